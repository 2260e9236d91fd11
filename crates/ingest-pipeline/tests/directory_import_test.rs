use std::path::Path;

use ingest_db::{ConnectionConfig, DbConnection, ImportOptions};
use ingest_pipeline::{FileLister, FileStemResolver, ImportJob, ImportRunner};

fn write_csv(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

/// vendors and orders, where orders carries a foreign key to vendors.
/// Name order would import orders first; dependency order must not.
async fn vendor_schema() -> DbConnection {
    let conn = DbConnection::new();
    conn.connect().await.unwrap();
    conn.execute(
        "CREATE TABLE vendors (id INTEGER PRIMARY KEY, name TEXT)",
        Vec::new(),
    )
    .await
    .unwrap();
    conn.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, vendor_id INTEGER REFERENCES vendors(id))",
        Vec::new(),
    )
    .await
    .unwrap();
    conn
}

async fn count(conn: &DbConnection, table: &str) -> i64 {
    match conn
        .query_value(&format!("SELECT COUNT(*) FROM {table}"), Vec::new())
        .await
        .unwrap()
    {
        Some(libsql::Value::Integer(count)) => count,
        other => panic!("unexpected count value: {other:?}"),
    }
}

#[tokio::test]
async fn test_directory_import_orders_parents_first() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "vendors.csv", "id,name\n1,Acme\n2,Globex\n");
    write_csv(dir.path(), "orders.csv", "id,vendor_id\n10,1\n11,2\n");

    let conn = vendor_schema().await;
    let runner = ImportRunner::new(conn.clone());

    let summary = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await
        .unwrap();

    // Foreign keys are enforced, so this only works if vendors were
    // imported before orders despite the file name order.
    assert!(!summary.has_errors());
    assert_eq!(summary.tables.len(), 2);
    assert_eq!(summary.inserted_rows, 4);
    assert_eq!(summary.tables[0].table, "vendors");
    assert_eq!(count(&conn, "vendors").await, 2);
    assert_eq!(count(&conn, "orders").await, 2);
}

#[tokio::test]
async fn test_directory_import_deletes_targets_first() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "vendors.csv", "id,name\n1,Acme\n");
    write_csv(dir.path(), "orders.csv", "id,vendor_id\n10,1\n");

    let conn = vendor_schema().await;
    conn.execute(
        "INSERT INTO vendors (id, name) VALUES (700, 'STALE')",
        Vec::new(),
    )
    .await
    .unwrap();
    conn.execute(
        "INSERT INTO orders (id, vendor_id) VALUES (800, 700)",
        Vec::new(),
    )
    .await
    .unwrap();

    let runner = ImportRunner::new(conn.clone()).delete_before_import(true);
    let summary = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await
        .unwrap();

    assert!(!summary.has_errors());
    assert!(summary.messages.iter().any(|m| m.contains("Deleted")));
    assert_eq!(count(&conn, "vendors").await, 1);
    assert_eq!(count(&conn, "orders").await, 1);
    let stale = conn
        .query_value("SELECT COUNT(*) FROM vendors WHERE id = 700", Vec::new())
        .await
        .unwrap();
    assert_eq!(stale, Some(libsql::Value::Integer(0)));
}

#[tokio::test]
async fn test_missing_table_skipped_when_continuing() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "vendors.csv", "id,name\n1,Acme\n");
    write_csv(dir.path(), "phantom.csv", "id\n1\n");

    let conn = vendor_schema().await;
    let options = ImportOptions {
        continue_on_error: true,
        ..ImportOptions::default()
    };
    let runner = ImportRunner::new(conn.clone()).with_options(options);

    let summary = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await
        .unwrap();

    // The file without a target table is skipped, the rest imports.
    assert!(summary.has_errors());
    assert_eq!(summary.inserted_rows, 1);
    assert_eq!(count(&conn, "vendors").await, 1);
}

#[tokio::test]
async fn test_missing_table_aborts_without_continue() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "aardvark.csv", "id\n1\n");
    write_csv(dir.path(), "vendors.csv", "id,name\n1,Acme\n");

    let conn = vendor_schema().await;
    let runner = ImportRunner::new(conn.clone());

    let summary = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await
        .unwrap();

    // aardvark has no table and sorts first; the run stops there.
    assert!(summary.has_errors());
    assert_eq!(summary.inserted_rows, 0);
    assert_eq!(count(&conn, "vendors").await, 0);
}

#[tokio::test]
async fn test_empty_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let conn = DbConnection::new();
    let runner = ImportRunner::new(conn);

    let result = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cancelled_run_skips_all_files() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "vendors.csv", "id,name\n1,Acme\n");

    let conn = vendor_schema().await;
    let runner = ImportRunner::new(conn.clone());
    runner.control().cancel();

    let summary = runner
        .run_directory(&FileLister::new(dir.path()), &FileStemResolver)
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.inserted_rows, 0);
    assert_eq!(count(&conn, "vendors").await, 0);
}

#[tokio::test]
async fn test_job_file_drives_single_import() {
    let dir = tempfile::tempdir().unwrap();
    write_csv(dir.path(), "orders.csv", "id,name\n1,Alice\n2,Bob\n");
    let db_path = dir.path().join("import.db");

    // Prepare the target schema in the database file the job points at.
    let setup = DbConnection::with_config(ConnectionConfig::local(
        db_path.display().to_string(),
    ));
    setup.connect().await.unwrap();
    setup
        .execute(
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, name TEXT)",
            Vec::new(),
        )
        .await
        .unwrap();
    setup.close().await;

    // No explicit table: the file stem names the target.
    let yaml = format!(
        "source: {}\ndatabase: {}\n",
        dir.path().join("orders.csv").display(),
        db_path.display()
    );
    let job_path = dir.path().join("orders.yaml");
    std::fs::write(&job_path, yaml).unwrap();

    let job = ImportJob::from_path(&job_path).unwrap();
    let summary = ImportRunner::run_job(&job).await.unwrap();
    assert_eq!(summary.inserted_rows, 2);
    assert!(!summary.has_errors());

    let verify = DbConnection::with_config(ConnectionConfig::local(
        db_path.display().to_string(),
    ));
    verify.connect().await.unwrap();
    assert_eq!(count(&verify, "orders").await, 2);
    let name = verify
        .query_value("SELECT name FROM orders WHERE id = 1", Vec::new())
        .await
        .unwrap();
    assert_eq!(name, Some(libsql::Value::Text("Alice".to_string())));
}
