use ingest_core::{
    CellValue, ColumnIdentifier, ColumnType, DataReceiver, TableIdentifier,
};
use ingest_db::{DataImporter, DbConnection, ImportOptions, MemoryProbe};

async fn connection_with_orders() -> DbConnection {
    let conn = DbConnection::new();
    conn.connect().await.unwrap();
    conn.execute(
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, name TEXT, qty INTEGER)",
        Vec::new(),
    )
    .await
    .unwrap();
    conn
}

fn order_columns() -> Vec<ColumnIdentifier> {
    vec![
        ColumnIdentifier::new("id", ColumnType::Integer).primary_key(),
        ColumnIdentifier::new("name", ColumnType::Text),
        ColumnIdentifier::new("qty", ColumnType::Integer),
    ]
}

fn order_row(id: i64, name: &str, qty: i64) -> Vec<CellValue> {
    vec![
        CellValue::Integer(id),
        CellValue::Text(name.to_string()),
        CellValue::Integer(qty),
    ]
}

async fn count(conn: &DbConnection) -> i64 {
    match conn
        .query_value("SELECT COUNT(*) FROM orders", Vec::new())
        .await
        .unwrap()
    {
        Some(libsql::Value::Integer(count)) => count,
        other => panic!("unexpected count value: {other:?}"),
    }
}

#[tokio::test]
async fn test_savepoint_recovers_rows_after_bad_one() {
    let conn = connection_with_orders().await;
    let options = ImportOptions {
        continue_on_error: true,
        ..ImportOptions::default()
    };
    let mut importer = DataImporter::new(conn.clone()).with_options(options).unwrap();

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    assert!(importer.should_process_next_row());
    importer.process_row(order_row(1, "a", 1)).await.unwrap();
    assert!(importer.should_process_next_row());
    // Duplicate key. The savepoint confines the failure to this row.
    importer.process_row(order_row(1, "b", 2)).await.unwrap();
    assert!(importer.should_process_next_row());
    importer.process_row(order_row(2, "c", 3)).await.unwrap();

    importer.table_import_finished().await.unwrap();
    importer.import_finished().await;

    let summary = importer.into_summary();
    assert_eq!(summary.inserted_rows, 2);
    assert_eq!(summary.rejected_rows, 1);
    assert_eq!(summary.total_rows, 3);
    assert!(summary.has_errors());
    assert!(summary
        .messages
        .iter()
        .any(|message| message.contains("Row 2 rejected")));
    assert_eq!(count(&conn).await, 2);
}

#[tokio::test]
async fn test_fatal_row_error_rolls_back_table() {
    let conn = connection_with_orders().await;
    let mut importer = DataImporter::new(conn.clone());

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    assert!(importer.should_process_next_row());
    importer.process_row(order_row(1, "a", 1)).await.unwrap();
    assert!(importer.should_process_next_row());
    let err = importer.process_row(order_row(1, "b", 2)).await;
    assert!(err.is_err());

    // Finishing after the failure must not raise again.
    importer.import_finished().await;

    let summary = importer.into_summary();
    assert!(summary.has_errors());
    let stats = summary.table("orders").unwrap();
    assert_eq!(stats.inserted, 0);
    assert_eq!(stats.rejected, 1);
    // The whole table transaction was rolled back.
    assert_eq!(count(&conn).await, 0);
}

#[tokio::test]
async fn test_row_length_mismatch_executes_nothing() {
    let conn = connection_with_orders().await;
    let mut importer = DataImporter::new(conn.clone());

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    let short_row = vec![CellValue::Integer(1), CellValue::Text("a".to_string())];
    let err = importer.process_row(short_row).await.unwrap_err();
    assert!(err.to_string().contains("3 column(s)"));

    importer.import_finished().await;
    let summary = importer.into_summary();
    assert!(summary.has_errors());
    assert_eq!(summary.inserted_rows, 0);
    assert_eq!(summary.rejected_rows, 1);
    assert_eq!(count(&conn).await, 0);
}

#[tokio::test]
async fn test_max_errors_aborts_the_run() {
    let conn = connection_with_orders().await;
    let options = ImportOptions {
        continue_on_error: true,
        max_errors: 2,
        ..ImportOptions::default()
    };
    let mut importer = DataImporter::new(conn.clone()).with_options(options).unwrap();

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    assert!(importer.should_process_next_row());
    importer.process_row(order_row(1, "a", 1)).await.unwrap();
    assert!(importer.should_process_next_row());
    importer.process_row(order_row(1, "b", 2)).await.unwrap();
    assert!(importer.should_process_next_row());
    let err = importer.process_row(order_row(1, "c", 3)).await;
    assert!(err.is_err());

    importer.import_finished().await;
    let summary = importer.into_summary();
    assert!(summary.has_errors());
    assert!(summary
        .messages
        .iter()
        .any(|message| message.contains("Maximum of 2 error(s) reached")));
}

#[tokio::test]
async fn test_bad_file_collects_raw_records() {
    let dir = tempfile::tempdir().unwrap();
    let bad_path = dir.path().join("orders.bad");

    let conn = connection_with_orders().await;
    let options = ImportOptions {
        continue_on_error: true,
        bad_file: Some(bad_path.clone()),
        ..ImportOptions::default()
    };
    let mut importer = DataImporter::new(conn.clone()).with_options(options).unwrap();

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();
    for row in [
        order_row(1, "a", 1),
        order_row(1, "b", 2),
        order_row(1, "c", 3),
    ] {
        assert!(importer.should_process_next_row());
        importer.process_row(row).await.unwrap();
    }
    importer.table_import_finished().await.unwrap();
    importer.import_finished().await;

    let summary = importer.into_summary();
    assert_eq!(summary.inserted_rows, 1);
    assert_eq!(summary.rejected_rows, 2);

    let content = std::fs::read_to_string(&bad_path).unwrap();
    assert_eq!(content, "1,b,2\n1,c,3\n");
}

#[tokio::test]
async fn test_row_window_skips_and_stops() {
    let conn = connection_with_orders().await;
    let options = ImportOptions {
        start_row: Some(2),
        end_row: Some(3),
        ..ImportOptions::default()
    };
    let mut importer = DataImporter::new(conn.clone()).with_options(options).unwrap();
    let control = importer.control();

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    let rows: Vec<Vec<CellValue>> = (1..=5)
        .map(|id| order_row(id, &format!("row-{id}"), id))
        .collect();
    let mut processed = 0;
    for row in rows {
        if control.should_halt() {
            break;
        }
        if importer.should_process_next_row() {
            importer.process_row(row).await.unwrap();
            processed += 1;
        } else {
            importer.next_row_skipped();
        }
    }

    importer.table_import_finished().await.unwrap();
    importer.import_finished().await;

    assert_eq!(processed, 2);
    assert!(control.is_stopped());
    assert!(!control.is_cancelled());

    let summary = importer.into_summary();
    assert_eq!(summary.inserted_rows, 2);
    assert!(!summary.cancelled);
    assert_eq!(count(&conn).await, 2);

    let ids = conn
        .query_value("SELECT MIN(id) + MAX(id) FROM orders", Vec::new())
        .await
        .unwrap();
    // Rows 2 and 3 of the source made it in.
    assert_eq!(ids, Some(libsql::Value::Integer(5)));
}

struct AlwaysLow;

impl MemoryProbe for AlwaysLow {
    fn low_memory(&mut self) -> bool {
        true
    }
}

#[tokio::test]
async fn test_memory_probe_cancels_the_run() {
    let conn = connection_with_orders().await;
    let mut importer = DataImporter::new(conn.clone()).with_memory_probe(Box::new(AlwaysLow));
    let control = importer.control();

    let table = TableIdentifier::new("orders");
    importer
        .set_target_table(&table, &order_columns(), None)
        .await
        .unwrap();

    // The probe is consulted every 100 rows, so the first 99 pass.
    for id in 1..=99 {
        assert!(importer.should_process_next_row());
        importer
            .process_row(order_row(id, &format!("row-{id}"), id))
            .await
            .unwrap();
    }
    assert!(importer.should_process_next_row());
    let err = importer.process_row(order_row(100, "last", 100)).await;
    match err {
        Err(ingest_core::Error::MemoryExhausted { .. }) => {}
        other => panic!("expected memory exhaustion, got {other:?}"),
    }
    assert!(control.is_cancelled());

    importer.import_cancelled().await;
    let summary = importer.into_summary();
    assert!(summary.cancelled);
    assert!(summary
        .messages
        .iter()
        .any(|message| message.contains("free memory is running low")));
    assert_eq!(count(&conn).await, 0);
}
