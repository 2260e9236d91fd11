//! Source-to-target column mapping.
//!
//! A source file declares columns by position (header names or synthetic
//! `column_N` names). Each source column is either mapped to a real
//! target column with a dense index into the row array handed to the
//! receiver, or skipped.

use tracing::debug;

use crate::identifier::ColumnIdentifier;
use crate::{Error, Result};

/// One source-file column and its optional target.
#[derive(Debug, Clone)]
pub struct ImportFileColumn {
    /// Column name as found in the source (header or generated).
    pub source_name: String,
    /// Zero-based position in the source record.
    pub source_index: usize,
    /// Target column, `None` when the source column is skipped.
    pub target: Option<ColumnIdentifier>,
    /// Dense, zero-based index into the receiver row. `None` when skipped.
    pub target_index: Option<usize>,
}

impl ImportFileColumn {
    pub fn is_skipped(&self) -> bool {
        self.target.is_none()
    }
}

/// Resolved mapping for one source. Invariant: target indices are
/// unique, zero-based and densely packed in source order.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    columns: Vec<ImportFileColumn>,
    target_columns: Vec<ColumnIdentifier>,
}

impl ColumnMapping {
    /// Resolve source column names against the target table's columns.
    ///
    /// Unmatched source columns are skipped when `ignore_missing` is set,
    /// otherwise they abort the import. A mapping with zero matched
    /// columns is always an error.
    pub fn resolve(
        source_names: &[String],
        table_columns: &[ColumnIdentifier],
        ignore_missing: bool,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(source_names.len());
        let mut target_columns = Vec::new();

        for (source_index, source_name) in source_names.iter().enumerate() {
            let found = table_columns
                .iter()
                .find(|column| column.matches_name(source_name));

            match found {
                Some(column) => {
                    let target_index = target_columns.len();
                    target_columns.push(column.clone());
                    columns.push(ImportFileColumn {
                        source_name: source_name.clone(),
                        source_index,
                        target: Some(column.clone()),
                        target_index: Some(target_index),
                    });
                }
                None if ignore_missing => {
                    debug!(column = %source_name, "source column has no target, skipping");
                    columns.push(ImportFileColumn {
                        source_name: source_name.clone(),
                        source_index,
                        target: None,
                        target_index: None,
                    });
                }
                None => {
                    return Err(Error::column_mapping(format!(
                        "Source column '{source_name}' not found in target table"
                    )));
                }
            }
        }

        Self::checked(columns, target_columns)
    }

    /// Build a mapping from explicit source/target pairs, for imports
    /// into a transient row structure without a physical table.
    pub fn from_pairs(pairs: Vec<(String, Option<ColumnIdentifier>)>) -> Result<Self> {
        let mut columns = Vec::with_capacity(pairs.len());
        let mut target_columns = Vec::new();

        for (source_index, (source_name, target)) in pairs.into_iter().enumerate() {
            let target_index = target.as_ref().map(|_| target_columns.len());
            if let Some(column) = &target {
                target_columns.push(column.clone());
            }
            columns.push(ImportFileColumn {
                source_name,
                source_index,
                target,
                target_index,
            });
        }

        Self::checked(columns, target_columns)
    }

    fn checked(
        columns: Vec<ImportFileColumn>,
        target_columns: Vec<ColumnIdentifier>,
    ) -> Result<Self> {
        if target_columns.is_empty() {
            return Err(Error::column_mapping(
                "No source column could be mapped to a target column",
            ));
        }
        Ok(Self {
            columns,
            target_columns,
        })
    }

    /// All source columns in file order, including skipped ones.
    pub fn columns(&self) -> &[ImportFileColumn] {
        &self.columns
    }

    /// The dense target column list, in receiver row order.
    pub fn target_columns(&self) -> &[ColumnIdentifier] {
        &self.target_columns
    }

    /// Number of mapped (non-skipped) columns.
    pub fn mapped_count(&self) -> usize {
        self.target_columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::ColumnType;

    fn sample_table_columns() -> Vec<ColumnIdentifier> {
        vec![
            ColumnIdentifier::new("id", ColumnType::Integer).primary_key(),
            ColumnIdentifier::new("name", ColumnType::Text),
            ColumnIdentifier::new("total", ColumnType::Decimal),
        ]
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_string()).collect()
    }

    #[test]
    fn resolve_matches_case_insensitively() {
        let mapping =
            ColumnMapping::resolve(&names(&["ID", "Name"]), &sample_table_columns(), false)
                .unwrap();

        assert_eq!(mapping.mapped_count(), 2);
        assert_eq!(mapping.target_columns()[0].name, "id");
        assert_eq!(mapping.columns()[1].target_index, Some(1));
    }

    #[test]
    fn unmatched_column_is_error_by_default() {
        let result =
            ColumnMapping::resolve(&names(&["id", "missing"]), &sample_table_columns(), false);
        assert!(matches!(result, Err(Error::ColumnMapping { .. })));
    }

    #[test]
    fn unmatched_column_skipped_when_ignoring() {
        let mapping = ColumnMapping::resolve(
            &names(&["id", "comment", "name"]),
            &sample_table_columns(),
            true,
        )
        .unwrap();

        assert_eq!(mapping.mapped_count(), 2);
        assert!(mapping.columns()[1].is_skipped());
        // Indices stay dense across the skipped column.
        assert_eq!(mapping.columns()[0].target_index, Some(0));
        assert_eq!(mapping.columns()[2].target_index, Some(1));
    }

    #[test]
    fn zero_mapped_columns_is_always_error() {
        let result = ColumnMapping::resolve(&names(&["a", "b"]), &sample_table_columns(), true);
        assert!(matches!(result, Err(Error::ColumnMapping { .. })));

        let result = ColumnMapping::from_pairs(vec![("a".to_string(), None)]);
        assert!(matches!(result, Err(Error::ColumnMapping { .. })));
    }

    #[test]
    fn explicit_pairs_keep_order() {
        let mapping = ColumnMapping::from_pairs(vec![
            (
                "first".to_string(),
                Some(ColumnIdentifier::new("id", ColumnType::Integer)),
            ),
            ("ignored".to_string(), None),
            (
                "second".to_string(),
                Some(ColumnIdentifier::new("name", ColumnType::Text)),
            ),
        ])
        .unwrap();

        assert_eq!(mapping.mapped_count(), 2);
        assert_eq!(mapping.columns()[2].target_index, Some(1));
    }
}
