//! Per-column regex filters and value modifiers.
//!
//! Filters reject whole rows based on raw string values before
//! conversion; modifiers rewrite raw values before conversion. Both are
//! keyed by target column name, case-insensitively.

use std::collections::HashMap;

use regex::Regex;

use crate::identifier::ColumnType;
use crate::{Error, Result};

/// Row filter: a row is kept only when every filtered column's raw value
/// matches its pattern completely.
#[derive(Debug, Clone, Default)]
pub struct ColumnFilter {
    patterns: HashMap<String, Regex>,
}

impl ColumnFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern for a column. The pattern must match the whole
    /// raw value; invalid patterns are configuration errors.
    pub fn add_filter(&mut self, column: &str, pattern: &str) -> Result<()> {
        let anchored = format!("^(?:{pattern})$");
        let regex = Regex::new(&anchored).map_err(|err| {
            Error::config(format!(
                "Invalid filter expression '{pattern}' for column '{column}': {err}"
            ))
        })?;
        self.patterns.insert(column.to_ascii_lowercase(), regex);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether filtering applies to the column type at all. Blob columns
    /// are never filtered; clob columns only when their value is inline
    /// text rather than a file reference.
    pub fn applies_to(column_type: ColumnType, clob_is_filename: bool) -> bool {
        match column_type {
            ColumnType::Blob => false,
            ColumnType::Clob => !clob_is_filename,
            _ => true,
        }
    }

    /// Check one raw value. Columns without a registered pattern always
    /// pass.
    pub fn retain(&self, column: &str, raw: &str) -> bool {
        match self.patterns.get(&column.to_ascii_lowercase()) {
            Some(regex) => regex.is_match(raw),
            None => true,
        }
    }
}

/// A single value rewrite step.
#[derive(Debug, Clone)]
pub enum Modifier {
    /// Keep the character range `[start, end)`; an open end keeps the
    /// rest of the string.
    Substring { start: usize, end: Option<usize> },
    /// Truncate to at most this many characters.
    MaxLength(usize),
    /// Replace every match of the pattern.
    RegexReplace { pattern: Regex, replacement: String },
}

/// Ordered modifier chains per target column.
#[derive(Debug, Clone, Default)]
pub struct ValueModifiers {
    modifiers: HashMap<String, Vec<Modifier>>,
}

impl ValueModifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_substring(&mut self, column: &str, start: usize, end: Option<usize>) {
        self.push(column, Modifier::Substring { start, end });
    }

    pub fn add_max_length(&mut self, column: &str, length: usize) {
        self.push(column, Modifier::MaxLength(length));
    }

    pub fn add_regex_replace(
        &mut self,
        column: &str,
        pattern: &str,
        replacement: &str,
    ) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|err| {
            Error::config(format!(
                "Invalid replacement pattern '{pattern}' for column '{column}': {err}"
            ))
        })?;
        self.push(
            column,
            Modifier::RegexReplace {
                pattern: regex,
                replacement: replacement.to_string(),
            },
        );
        Ok(())
    }

    fn push(&mut self, column: &str, modifier: Modifier) {
        self.modifiers
            .entry(column.to_ascii_lowercase())
            .or_default()
            .push(modifier);
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Apply the column's modifier chain in registration order.
    pub fn apply(&self, column: &str, raw: &str) -> String {
        let Some(chain) = self.modifiers.get(&column.to_ascii_lowercase()) else {
            return raw.to_string();
        };

        let mut value = raw.to_string();
        for modifier in chain {
            value = match modifier {
                Modifier::Substring { start, end } => {
                    let chars: Vec<char> = value.chars().collect();
                    let from = (*start).min(chars.len());
                    let to = end.map_or(chars.len(), |end| end.min(chars.len()));
                    if from >= to {
                        String::new()
                    } else {
                        chars[from..to].iter().collect()
                    }
                }
                Modifier::MaxLength(length) => value.chars().take(*length).collect(),
                Modifier::RegexReplace {
                    pattern,
                    replacement,
                } => pattern.replace_all(&value, replacement.as_str()).into_owned(),
            };
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_whole_value() {
        let mut filter = ColumnFilter::new();
        filter.add_filter("code", "[A-Z]{3}").unwrap();

        assert!(filter.retain("code", "ABC"));
        assert!(filter.retain("CODE", "ABC"));
        assert!(!filter.retain("code", "ABCD"));
        assert!(!filter.retain("code", "ab"));
        // Unfiltered columns always pass.
        assert!(filter.retain("other", "anything"));
    }

    #[test]
    fn invalid_filter_pattern_is_config_error() {
        let mut filter = ColumnFilter::new();
        let err = filter.add_filter("code", "([").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn filter_skips_lob_columns() {
        assert!(!ColumnFilter::applies_to(ColumnType::Blob, false));
        assert!(ColumnFilter::applies_to(ColumnType::Clob, false));
        assert!(!ColumnFilter::applies_to(ColumnType::Clob, true));
        assert!(ColumnFilter::applies_to(ColumnType::Text, true));
    }

    #[test]
    fn substring_and_max_length() {
        let mut modifiers = ValueModifiers::new();
        modifiers.add_substring("name", 1, Some(4));
        modifiers.add_max_length("name", 2);

        assert_eq!(modifiers.apply("name", "abcdef"), "bc");
        assert_eq!(modifiers.apply("other", "abcdef"), "abcdef");
    }

    #[test]
    fn substring_handles_out_of_range() {
        let mut modifiers = ValueModifiers::new();
        modifiers.add_substring("name", 10, None);
        assert_eq!(modifiers.apply("name", "short"), "");
    }

    #[test]
    fn regex_replace_chain() {
        let mut modifiers = ValueModifiers::new();
        modifiers.add_regex_replace("phone", r"[^0-9]", "").unwrap();
        assert_eq!(modifiers.apply("phone", "+1 (555) 123"), "1555123");
    }
}
