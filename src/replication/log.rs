//! Append-only operation log kept for observability.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which kind of operation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    LocalInsert,
    LocalDelete,
    RemoteInsert,
    RemoteDelete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationKind::LocalInsert => "Local INSERT",
            OperationKind::LocalDelete => "Local DELETE",
            OperationKind::RemoteInsert => "Remote INSERT",
            OperationKind::RemoteDelete => "Remote DELETE",
        };
        f.write_str(label)
    }
}

/// A single applied operation.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub kind: OperationKind,
    pub detail: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.at.format("%H:%M:%S%.3f"),
            self.kind,
            self.detail
        )
    }
}

/// Entries in the order they were applied. Never truncated.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: OperationKind, detail: impl Into<String>) {
        self.entries.push(LogEntry {
            at: Utc::now(),
            kind,
            detail: detail.into(),
        });
    }

    /// The last `n` entries, oldest first.
    pub fn last(&self, n: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
