//! Parameter batching for a single prepared statement.
//!
//! The buffer is passive. The importer pushes bound rows, asks
//! whether the batch is full, and drains it for execution so the
//! affected-row counts stay under its control.

/// Bound parameter rows queued for one statement.
#[derive(Debug)]
pub struct BatchedStatement {
    sql: String,
    batch_size: usize,
    buffer: Vec<Vec<libsql::Value>>,
}

impl BatchedStatement {
    pub fn new(sql: impl Into<String>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sql: sql.into(),
            batch_size,
            buffer: Vec::with_capacity(batch_size),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn push(&mut self, params: Vec<libsql::Value>) {
        self.buffer.push(params);
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the queued rows, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<Vec<libsql::Value>> {
        std::mem::take(&mut self.buffer)
    }

    /// Discard queued rows without executing them.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: i64) -> Vec<libsql::Value> {
        vec![libsql::Value::Integer(value)]
    }

    #[test]
    fn fills_and_drains() {
        let mut batch = BatchedStatement::new("INSERT INTO t (a) VALUES (?1)", 2);
        assert!(batch.is_empty());

        batch.push(row(1));
        assert!(!batch.is_full());
        batch.push(row(2));
        assert!(batch.is_full());

        let rows = batch.drain();
        assert_eq!(rows.len(), 2);
        assert!(batch.is_empty());
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let batch = BatchedStatement::new("INSERT", 0);
        assert!(batch.is_empty());
        let mut batch = batch;
        batch.push(row(1));
        assert!(batch.is_full());
    }

    #[test]
    fn clear_discards_rows() {
        let mut batch = BatchedStatement::new("INSERT", 10);
        batch.push(row(1));
        batch.push(row(2));
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
