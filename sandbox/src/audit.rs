use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    Read,
    Write,
    Delete,
    Stat,
    ChangeRoot,
    Search,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OperationKind::List => "list",
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Delete => "delete",
            OperationKind::Stat => "stat",
            OperationKind::ChangeRoot => "cd",
            OperationKind::Search => "search",
        };
        f.write_str(label)
    }
}

/// One attempted operation. `target` is kept exactly as the caller supplied it.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub operation: OperationKind,
    pub target: String,
    pub success: bool,
    pub root: PathBuf,
    pub details: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(operation: OperationKind, target: impl Into<String>, root: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            operation,
            target: target.into(),
            success: true,
            root,
            details: Map::new(),
        }
    }

    pub fn failed(mut self, error: impl Display) -> Self {
        self.success = false;
        self.details
            .insert("error".to_string(), Value::String(error.to_string()));
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

/// Append-only ring of audit records; the oldest record is dropped first.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    records: VecDeque<AuditRecord>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity.min(DEFAULT_AUDIT_CAPACITY)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: AuditRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// The last `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAPACITY)
    }
}
