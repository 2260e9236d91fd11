//! Parameter binding, including large objects read from files.
//!
//! libsql takes whole-value buffers, so file-backed LOBs are read in
//! chunks into a single allocation capped by the configured limit.
//! Exceeding the cap is a row-level error, never an unbounded
//! allocation.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use ingest_core::CellValue;

use crate::constants::{BoundConstants, BoundKind};
use crate::dml::ParamSource;
use crate::{Error, Result};

/// Default cap for file-backed blob/clob values.
pub const DEFAULT_MAX_LOB_SIZE: usize = 64 * 1024 * 1024;

const LOB_CHUNK_SIZE: usize = 64 * 1024;

/// Convert one cell into a libsql parameter value.
pub async fn bind_value(value: &CellValue, max_lob_size: usize) -> Result<libsql::Value> {
    match value {
        CellValue::Null => Ok(libsql::Value::Null),
        CellValue::Text(text) => Ok(libsql::Value::Text(text.clone())),
        CellValue::Integer(value) => Ok(libsql::Value::Integer(*value)),
        CellValue::Decimal(value) => Ok(libsql::Value::Real(*value)),
        CellValue::Boolean(value) => Ok(libsql::Value::Integer(i64::from(*value))),
        CellValue::Date(date) => Ok(libsql::Value::Text(date.format("%Y-%m-%d").to_string())),
        CellValue::Timestamp(timestamp) => Ok(libsql::Value::Text(
            timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        )),
        CellValue::Blob(bytes) => Ok(libsql::Value::Blob(bytes.clone())),
        CellValue::BlobFile(path) => {
            let bytes = read_lob(path, max_lob_size).await?;
            Ok(libsql::Value::Blob(bytes))
        }
        CellValue::ClobFile(path) => {
            let bytes = read_lob(path, max_lob_size).await?;
            let text = String::from_utf8(bytes).map_err(|_| Error::Lob {
                path: path.display().to_string(),
                details: "clob file is not valid UTF-8".to_string(),
            })?;
            Ok(libsql::Value::Text(text))
        }
    }
}

/// Bind a full parameter row for a prepared statement: row cells,
/// constant values and the current line number, in slot order.
pub async fn bind_row(
    sources: &[ParamSource],
    row: &[CellValue],
    constants: &BoundConstants,
    line: u64,
    max_lob_size: usize,
) -> Result<Vec<libsql::Value>> {
    let mut params = Vec::with_capacity(sources.len());
    for source in sources {
        let value = match source {
            ParamSource::Row(index) => {
                let cell = row.get(*index).ok_or_else(|| {
                    Error::config(format!("Row has no value at index {index}"))
                })?;
                bind_value(cell, max_lob_size).await?
            }
            ParamSource::Constant(index) => {
                let cell = constants.value_at(*index).ok_or_else(|| {
                    Error::config(format!("No constant value bound at index {index}"))
                })?;
                bind_value(cell, max_lob_size).await?
            }
            ParamSource::LineNumber => libsql::Value::Integer(line as i64),
        };
        params.push(value);
    }
    Ok(params)
}

async fn read_lob(path: &Path, max_lob_size: usize) -> Result<Vec<u8>> {
    let mut file = File::open(path).await.map_err(|err| Error::Lob {
        path: path.display().to_string(),
        details: format!("cannot open: {err}"),
    })?;

    let mut data = Vec::new();
    let mut chunk = vec![0u8; LOB_CHUNK_SIZE];
    loop {
        let read = file.read(&mut chunk).await.map_err(|err| Error::Lob {
            path: path.display().to_string(),
            details: format!("read failed: {err}"),
        })?;
        if read == 0 {
            break;
        }
        if data.len() + read > max_lob_size {
            return Err(Error::Lob {
                path: path.display().to_string(),
                details: format!("exceeds the {max_lob_size} byte limit"),
            });
        }
        data.extend_from_slice(&chunk[..read]);
    }
    Ok(data)
}
