//! Sink for rejected source records.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::messages::MessageBuffer;
use crate::Result;

const DEFAULT_MAX_RECORDS: u64 = 100;

/// Where rejected raw records go: a dedicated bad file (one per run,
/// UTF-8) or the run's message buffer, capped at a maximum record count
/// after which a single summary line is emitted.
#[derive(Debug)]
pub struct RejectSink {
    target: RejectTarget,
    max_records: u64,
    recorded: u64,
}

#[derive(Debug)]
enum RejectTarget {
    BadFile {
        path: PathBuf,
        writer: BufWriter<File>,
    },
    Messages,
}

impl RejectSink {
    /// Route rejected records to a bad file. The file is created (or
    /// truncated) immediately so a failure surfaces before any row is
    /// processed.
    pub fn bad_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            target: RejectTarget::BadFile {
                path,
                writer: BufWriter::new(file),
            },
            max_records: u64::MAX,
            recorded: 0,
        })
    }

    /// Accumulate rejected records into the message buffer, up to
    /// `max_records` detailed entries.
    pub fn messages(max_records: u64) -> Self {
        Self {
            target: RejectTarget::Messages,
            max_records: max_records.max(1),
            recorded: 0,
        }
    }

    /// Record one rejected raw record.
    pub fn record(
        &mut self,
        line: u64,
        raw: &str,
        reason: &str,
        messages: &mut MessageBuffer,
    ) -> Result<()> {
        self.recorded += 1;
        warn!(line, reason, "record rejected");

        match &mut self.target {
            RejectTarget::BadFile { writer, .. } => {
                writeln!(writer, "{raw}")?;
                messages.append(format!("Row {line} rejected: {reason}"));
            }
            RejectTarget::Messages => {
                if self.recorded < self.max_records {
                    messages.append(format!("Row {line} rejected: {reason}\n  record: {raw}"));
                } else if self.recorded == self.max_records {
                    messages.append(format!(
                        "Row {line} rejected: {reason}\n  record: {raw}\nMaximum of {} rejected records reached, further details suppressed",
                        self.max_records
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of records recorded so far.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Path of the bad file, when one is configured.
    pub fn path(&self) -> Option<&Path> {
        match &self.target {
            RejectTarget::BadFile { path, .. } => Some(path),
            RejectTarget::Messages => None,
        }
    }

    /// Flush buffered output. Called once when the run finishes.
    pub fn finish(&mut self) -> Result<()> {
        if let RejectTarget::BadFile { writer, .. } = &mut self.target {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Default for RejectSink {
    fn default() -> Self {
        Self::messages(DEFAULT_MAX_RECORDS)
    }
}
