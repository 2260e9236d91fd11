//! Database connection and transaction primitives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use libsql::{Builder, Connection as LibsqlConnection, Database, Transaction, params_from_iter};
use tokio::sync::RwLock;
use tracing::debug;

use ingest_core::{ColumnIdentifier, ColumnType, TableIdentifier};

use crate::sql::{quote_identifier, quote_table};
use crate::{Error, Result};

/// Connection behavior for the import runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub database_url: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
    pub retry_attempts: usize,
}

impl ConnectionConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            auth_token: None,
            timeout_ms: 5_000,
            retry_attempts: 0,
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self {
            database_url: path.into(),
            auth_token: None,
            timeout_ms: 5_000,
            retry_attempts: 0,
        }
    }

    pub fn remote(url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
            auth_token: Some(auth_token.into()),
            timeout_ms: 5_000,
            retry_attempts: 3,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// What the connected database supports natively. The statement
/// builder demotes import modes when a flag is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbCapabilities {
    pub supports_upsert: bool,
    pub supports_insert_ignore: bool,
    pub supports_savepoints: bool,
}

impl DbCapabilities {
    /// SQLite-family targets support all three.
    pub fn sqlite() -> Self {
        Self {
            supports_upsert: true,
            supports_insert_ignore: true,
            supports_savepoints: true,
        }
    }
}

impl Default for DbCapabilities {
    fn default() -> Self {
        Self::sqlite()
    }
}

/// One database connection, exclusively owned by a single import run.
/// Clones share the underlying connection and metadata cache.
#[derive(Clone)]
pub struct DbConnection {
    state: Arc<ConnectionState>,
    config: ConnectionConfig,
}

struct ConnectionState {
    open: RwLock<Option<OpenDatabase>>,
    connected: AtomicBool,
    metadata: DashMap<String, Arc<Vec<ColumnIdentifier>>>,
}

struct OpenDatabase {
    // Keep the Database alive for the lifetime of the connection.
    _database: Database,
    connection: LibsqlConnection,
}

impl DbConnection {
    /// Create a connection with default config (libsql in-memory).
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    /// Create a connection with explicit config.
    pub fn with_config(config: ConnectionConfig) -> Self {
        Self {
            state: Arc::new(ConnectionState {
                open: RwLock::new(None),
                connected: AtomicBool::new(false),
                metadata: DashMap::new(),
            }),
            config,
        }
    }

    pub fn config(&self) -> ConnectionConfig {
        self.config.clone()
    }

    pub fn capabilities(&self) -> DbCapabilities {
        DbCapabilities::sqlite()
    }

    /// Open the connection, retrying with backoff when configured.
    pub async fn connect(&self) -> Result<()> {
        if self.state.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let attempts = self.config.retry_attempts + 1;
        for attempt in 0..attempts {
            match open_database(&self.config).await {
                Ok(open) => {
                    *self.state.open.write().await = Some(open);
                    self.state.connected.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                Err(err) => {
                    if attempt + 1 == attempts {
                        return Err(err);
                    }
                    let delay_ms = 100 * (1_u64 << attempt.min(6));
                    debug!(attempt, delay_ms, "connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }

        Err(Error::connection(format!(
            "Failed to connect after {attempts} attempt(s): exhausted retries"
        )))
    }

    pub async fn close(&self) {
        *self.state.open.write().await = None;
        self.state.connected.store(false, Ordering::SeqCst);
        self.state.metadata.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Execute one statement outside any explicit transaction. Returns
    /// the affected-row count.
    pub async fn execute(&self, sql: &str, params: Vec<libsql::Value>) -> Result<u64> {
        let connection = self.handle().await?;
        connection
            .execute(sql, params_from_iter(params))
            .await
            .map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })
    }

    /// Run a query and collect all result rows.
    pub async fn query_rows(&self, sql: &str, params: Vec<libsql::Value>) -> Result<Vec<libsql::Row>> {
        let connection = self.handle().await?;
        let mut rows = connection
            .query(sql, params_from_iter(params))
            .await
            .map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })?;

        let mut output = Vec::new();
        while let Some(row) = rows.next().await.map_err(|source| Error::Sql {
            statement: sql.to_string(),
            source,
        })? {
            output.push(row);
        }
        Ok(output)
    }

    /// Run a query expected to produce a single value.
    pub async fn query_value(
        &self,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<Option<libsql::Value>> {
        let connection = self.handle().await?;
        let mut rows = connection
            .query(sql, params_from_iter(params))
            .await
            .map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })?;
        // Read the value while the cursor is still on the row: libsql's
        // local rows are live cursor handles, not materialized data.
        match rows.next().await.map_err(|source| Error::Sql {
            statement: sql.to_string(),
            source,
        })? {
            Some(row) => {
                let value = row.get_value(0).map_err(|source| Error::Sql {
                    statement: sql.to_string(),
                    source,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn begin_transaction(&self) -> Result<DbTransaction> {
        let connection = self.handle().await?;
        let transaction = connection
            .transaction()
            .await
            .map_err(|source| Error::Libsql {
                context: "begin transaction".to_string(),
                source,
            })?;
        Ok(DbTransaction {
            transaction: Some(transaction),
            active: true,
        })
    }

    pub async fn table_exists(&self, table: &TableIdentifier) -> Result<bool> {
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND lower(name) = lower(?1)";
        let rows = self
            .query_rows(sql, vec![libsql::Value::Text(table.name.clone())])
            .await?;
        Ok(!rows.is_empty())
    }

    /// Column metadata for a table, cached per connection.
    pub async fn table_columns(&self, table: &TableIdentifier) -> Result<Arc<Vec<ColumnIdentifier>>> {
        let key = table.qualified_name().to_ascii_lowercase();
        if let Some(cached) = self.state.metadata.get(&key) {
            return Ok(cached.clone());
        }

        let sql = format!("PRAGMA table_info({})", quote_table(table));
        let connection = self.handle().await?;
        let mut rows = connection
            .query(&sql, ())
            .await
            .map_err(|source| Error::Sql {
                statement: sql.clone(),
                source,
            })?;

        // Read each row's values while the cursor is on it: libsql's
        // local rows are live cursor handles, not materialized data.
        let mut columns = Vec::new();
        while let Some(row) = rows.next().await.map_err(|source| Error::Sql {
            statement: sql.clone(),
            source,
        })? {
            let name: String = row.get(1).map_err(|source| Error::Sql {
                statement: sql.clone(),
                source,
            })?;
            let declared: String = row.get(2).map_err(|source| Error::Sql {
                statement: sql.clone(),
                source,
            })?;
            let pk: i64 = row.get(5).map_err(|source| Error::Sql {
                statement: sql.clone(),
                source,
            })?;

            let mut column = ColumnIdentifier::new(name, column_type_from_sql(&declared));
            if !declared.is_empty() {
                column = column.with_dbms_type(declared);
            }
            if pk > 0 {
                column = column.primary_key();
            }
            columns.push(column);
        }

        if columns.is_empty() {
            return Err(Error::metadata(
                table.qualified_name(),
                "Table not found",
            ));
        }

        let columns = Arc::new(columns);
        self.state.metadata.insert(key, columns.clone());
        Ok(columns)
    }

    /// Forget cached metadata for one table.
    pub fn invalidate_metadata(&self, table: &TableIdentifier) {
        self.state
            .metadata
            .remove(&table.qualified_name().to_ascii_lowercase());
    }

    /// Create a table from declared columns.
    pub async fn create_table(
        &self,
        table: &TableIdentifier,
        columns: &[ColumnIdentifier],
    ) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::metadata(
                table.qualified_name(),
                "Cannot create a table without columns",
            ));
        }

        let mut definitions: Vec<String> = columns
            .iter()
            .map(|column| {
                let sql_type = column
                    .dbms_type
                    .clone()
                    .unwrap_or_else(|| column.column_type.sql_name().to_string());
                format!("{} {}", quote_identifier(&column.name), sql_type)
            })
            .collect();

        let keys: Vec<String> = columns
            .iter()
            .filter(|column| column.primary_key)
            .map(|column| quote_identifier(&column.name))
            .collect();
        if !keys.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", keys.join(", ")));
        }

        let sql = format!(
            "CREATE TABLE {} ({})",
            quote_table(table),
            definitions.join(", ")
        );
        debug!(table = %table, "creating target table");
        self.execute(&sql, Vec::new()).await?;
        self.invalidate_metadata(table);
        Ok(())
    }

    pub(crate) async fn handle(&self) -> Result<LibsqlConnection> {
        let open = self.state.open.read().await;
        match open.as_ref() {
            Some(open) if self.is_connected() => Ok(open.connection.clone()),
            _ => Err(Error::connection("Database is not connected")),
        }
    }
}

impl Default for DbConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction wrapper; commit/rollback consume it.
pub struct DbTransaction {
    transaction: Option<Transaction>,
    active: bool,
}

impl DbTransaction {
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn execute(&self, sql: &str, params: Vec<libsql::Value>) -> Result<u64> {
        let tx = self.inner()?;
        tx.execute(sql, params_from_iter(params))
            .await
            .map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })
    }

    pub async fn query_value(
        &self,
        sql: &str,
        params: Vec<libsql::Value>,
    ) -> Result<Option<libsql::Value>> {
        let tx = self.inner()?;
        let mut rows = tx
            .query(sql, params_from_iter(params))
            .await
            .map_err(|source| Error::Sql {
                statement: sql.to_string(),
                source,
            })?;
        match rows.next().await.map_err(|source| Error::Sql {
            statement: sql.to_string(),
            source,
        })? {
            Some(row) => {
                let value = row.get_value(0).map_err(|source| Error::Sql {
                    statement: sql.to_string(),
                    source,
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub async fn commit(mut self) -> Result<()> {
        let tx = self.transaction.take().ok_or_else(|| {
            Error::transaction("Transaction is no longer active")
        })?;
        tx.commit().await.map_err(|source| Error::Libsql {
            context: "commit transaction".to_string(),
            source,
        })?;
        self.active = false;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        let tx = self.transaction.take().ok_or_else(|| {
            Error::transaction("Transaction is no longer active")
        })?;
        tx.rollback().await.map_err(|source| Error::Libsql {
            context: "rollback transaction".to_string(),
            source,
        })?;
        self.active = false;
        Ok(())
    }

    fn inner(&self) -> Result<&Transaction> {
        if !self.active {
            return Err(Error::transaction("Transaction is no longer active"));
        }
        self.transaction
            .as_ref()
            .ok_or_else(|| Error::transaction("Transaction is no longer active"))
    }
}

async fn open_database(config: &ConnectionConfig) -> Result<OpenDatabase> {
    let url = config.database_url.trim();
    if url.is_empty() {
        return Err(Error::config("database_url must be provided"));
    }
    if config.timeout_ms == 0 {
        return Err(Error::config("timeout_ms must be greater than zero"));
    }

    let build_future = build_database(config, url);
    let database = tokio::time::timeout(Duration::from_millis(config.timeout_ms), build_future)
        .await
        .map_err(|_| {
            Error::connection(format!(
                "Timed out after {}ms while opening database",
                config.timeout_ms
            ))
        })??;

    let connection = database.connect().map_err(|source| Error::Libsql {
        context: "connect database".to_string(),
        source,
    })?;
    connection
        .busy_timeout(Duration::from_millis(config.timeout_ms))
        .map_err(|source| Error::Libsql {
            context: "set busy timeout".to_string(),
            source,
        })?;
    connection
        .execute("PRAGMA foreign_keys = ON", ())
        .await
        .map_err(|source| Error::Sql {
            statement: "PRAGMA foreign_keys = ON".to_string(),
            source,
        })?;

    Ok(OpenDatabase {
        _database: database,
        connection,
    })
}

async fn build_database(config: &ConnectionConfig, url: &str) -> Result<Database> {
    if is_remote_url(url) {
        let token = config
            .auth_token
            .clone()
            .ok_or_else(|| Error::config("auth_token is required for remote databases"))?;
        let builder = Builder::new_remote(url.to_string(), token);
        builder.build().await.map_err(|source| Error::Libsql {
            context: "open remote database".to_string(),
            source,
        })
    } else {
        let path = url.strip_prefix("file:").unwrap_or(url);
        let builder = Builder::new_local(path);
        builder.build().await.map_err(|source| Error::Libsql {
            context: "open local database".to_string(),
            source,
        })
    }
}

fn is_remote_url(url: &str) -> bool {
    url.starts_with("libsql://") || url.starts_with("https://") || url.starts_with("http://")
}

fn column_type_from_sql(declared: &str) -> ColumnType {
    let upper = declared.to_ascii_uppercase();
    if upper.contains("INT") {
        ColumnType::Integer
    } else if upper.contains("CLOB") {
        ColumnType::Clob
    } else if upper.contains("BLOB") {
        ColumnType::Blob
    } else if upper.contains("BOOL") {
        ColumnType::Boolean
    } else if upper.contains("REAL")
        || upper.contains("FLOA")
        || upper.contains("DOUB")
        || upper.contains("DEC")
        || upper.contains("NUM")
    {
        ColumnType::Decimal
    } else if upper.contains("TIMESTAMP") || upper.contains("DATETIME") {
        ColumnType::Timestamp
    } else if upper.contains("DATE") {
        ColumnType::Date
    } else {
        ColumnType::Text
    }
}
