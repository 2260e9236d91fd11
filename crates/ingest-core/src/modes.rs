//! Import modes and prepare-time mode transitions.

use crate::{Error, Result};

/// Write strategy for one import run. Fixed for the duration of a run,
/// except for the one-time demotions discovered at statement
/// preparation (see [`ModeTransition`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Plain inserts.
    Insert,
    /// Inserts that silently skip rows violating a unique constraint.
    InsertIgnore,
    /// Native upsert (insert or update in one statement).
    Upsert,
    /// Updates only, matched by key columns.
    Update,
    /// Try insert first, fall back to update on a key violation.
    InsertUpdate,
    /// Try update first, insert when no row was affected.
    UpdateInsert,
}

impl ImportMode {
    /// Whether the mode ever executes an insert statement.
    pub fn uses_insert(self) -> bool {
        !matches!(self, ImportMode::Update)
    }

    /// Whether the mode ever executes an update statement.
    pub fn uses_update(self) -> bool {
        matches!(
            self,
            ImportMode::Update | ImportMode::InsertUpdate | ImportMode::UpdateInsert
        )
    }

    /// Whether the mode needs key columns to build its statements.
    pub fn needs_key_columns(self) -> bool {
        self.uses_update() || matches!(self, ImportMode::Upsert)
    }
}

impl std::str::FromStr for ImportMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "insert" => Ok(ImportMode::Insert),
            "insertignore" => Ok(ImportMode::InsertIgnore),
            "upsert" => Ok(ImportMode::Upsert),
            "update" => Ok(ImportMode::Update),
            "insertupdate" | "insert,update" => Ok(ImportMode::InsertUpdate),
            "updateinsert" | "update,insert" => Ok(ImportMode::UpdateInsert),
            _ => Err(Error::config(format!("Unknown import mode '{value}'"))),
        }
    }
}

impl std::fmt::Display for ImportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportMode::Insert => "insert",
            ImportMode::InsertIgnore => "insertIgnore",
            ImportMode::Upsert => "upsert",
            ImportMode::Update => "update",
            ImportMode::InsertUpdate => "insertUpdate",
            ImportMode::UpdateInsert => "updateInsert",
        };
        write!(f, "{name}")
    }
}

/// A one-time, irreversible mode change decided while preparing
/// statements, e.g. `upsert` demoting to `insertUpdate` when the target
/// database has no native upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: ImportMode,
    pub to: ImportMode,
    pub reason: String,
}

impl ModeTransition {
    pub fn new(from: ImportMode, to: ImportMode, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ModeTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mode {} demoted to {}: {}", self.from, self.to, self.reason)
    }
}
