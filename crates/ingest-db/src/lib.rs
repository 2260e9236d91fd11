//! # ingest-db
//!
//! Database side of the tabular import engine: the [`DataImporter`]
//! receiver that turns incoming rows into batched, savepoint-guarded
//! DML, the statement builder behind it, and the supporting pieces
//! (connection layer, constant column values, table deleter,
//! foreign-key dependency sorter, sequence adjustment).

pub mod batch;
pub mod bind;
pub mod connection;
pub mod constants;
pub mod deleter;
pub mod dependency;
pub mod dml;
pub mod importer;
pub mod sequence;
pub mod sql;

pub use batch::BatchedStatement;
pub use connection::{ConnectionConfig, DbCapabilities, DbConnection, DbTransaction};
pub use constants::{BoundConstant, BoundConstants, BoundKind, ConstantColumnValues, ConstantValue};
pub use deleter::{DeleteMode, TableDeleter};
pub use dml::{DmlBuilder, ParamSource, PreparedDml, PreparedImport};
pub use importer::{DataImporter, ImportOptions, KeyViolationMatcher, MemoryProbe};

use thiserror::Error;

/// Errors that can occur on the database side of an import.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {details}")]
    Config { details: String },

    #[error("Connection error: {details}")]
    Connection { details: String },

    #[error("Libsql error during {context}: {source}")]
    Libsql {
        context: String,
        #[source]
        source: libsql::Error,
    },

    #[error("SQL error executing `{statement}`: {source}")]
    Sql {
        statement: String,
        #[source]
        source: libsql::Error,
    },

    #[error("Metadata error on `{table}`: {details}")]
    Metadata { table: String, details: String },

    #[error("Transaction error: {details}")]
    Transaction { details: String },

    #[error("Foreign-key dependency cycle involving table `{table}`")]
    DependencyCycle { table: String },

    #[error("Large object `{path}` rejected: {details}")]
    Lob { path: String, details: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(details: impl Into<String>) -> Self {
        Self::Config {
            details: details.into(),
        }
    }

    pub fn connection(details: impl Into<String>) -> Self {
        Self::Connection {
            details: details.into(),
        }
    }

    pub fn metadata(table: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Metadata {
            table: table.into(),
            details: details.into(),
        }
    }

    pub fn transaction(details: impl Into<String>) -> Self {
        Self::Transaction {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Receiver failures cross the producer/receiver contract as
/// `Receiver` errors carrying the database detail as text.
impl From<Error> for ingest_core::Error {
    fn from(err: Error) -> Self {
        ingest_core::Error::receiver("database", err.to_string())
    }
}
