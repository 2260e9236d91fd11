//! # ingest-text
//!
//! Delimited text file producer.
//!
//! This crate reads CSV-style files with the csv crate, maps source
//! columns to target columns, converts and filters values, and drives a
//! [`ingest_core::DataReceiver`] through the import contract.

pub mod config;
pub mod parser;

pub use config::TextParserConfig;
pub use parser::TextFileParser;

pub use ingest_core::{Error, Result};
