//! # ingest-sheet
//!
//! Spreadsheet row data producer. Workbook decoding is out of scope;
//! this crate consumes any [`SpreadsheetReader`] implementation and
//! drives the import callback contract over its sheets, including the
//! all-sheets mode where each sheet name selects the target table.

/// Sheet-driven parsing loop.
pub mod parser;
/// Workbook access trait and the in-memory implementation.
pub mod reader;

pub use parser::{SheetFileParser, SheetSelection};
pub use reader::{MemoryWorkbook, ReaderOptions, SpreadsheetReader};

pub use ingest_core::{Error, Result};
