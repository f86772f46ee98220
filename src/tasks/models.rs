//! Data models for the task queue.
//!
//! Rows as the table stores them, and the diagnostic projection handed out by
//! `list_pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned by the table on insert.
///
/// Strictly increasing and never reused; doubles as the watermark key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A row about to be inserted; the table assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskRow {
    pub payload: Vec<u8>,
    pub target_index: Option<i64>,
    pub kind: String,
    pub enqueued_at: DateTime<Utc>,
}

/// A persisted task row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRow {
    pub id: TaskId,
    pub payload: Vec<u8>,
    pub target_index: Option<i64>,
    pub kind: String,
    /// `None` when the stored timestamp is out of range.
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl TaskRow {
    /// Position of this row in the `(target_index, kind)` secondary index.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            target_index: self.target_index,
            kind: self.kind.clone(),
            id: self.id,
        }
    }
}

/// Key of the secondary index. The trailing id makes it unique and gives a
/// stable order among rows of the same group.
///
/// `None` sorts before every `Some`, the same way SQLite orders NULLs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub target_index: Option<i64>,
    pub kind: String,
    pub id: TaskId,
}

/// Range restriction for a secondary-index scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRange {
    /// Every entry of the index, from the first one.
    All,
    /// Inclusive range of one exact `(target_index, kind)` key.
    Exact {
        target_index: Option<i64>,
        kind: String,
    },
}

impl GroupRange {
    pub fn contains(&self, key: &GroupKey) -> bool {
        match self {
            GroupRange::All => true,
            GroupRange::Exact { target_index, kind } => {
                key.target_index == *target_index && key.kind == *kind
            }
        }
    }
}

/// Index id reported by `list_pending` for tasks that apply globally.
pub const NO_TARGET_INDEX: i64 = -1;

/// Diagnostic view of a pending row. Never includes the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub id: TaskId,
    pub enqueued_at: Option<DateTime<Utc>>,
    /// `NO_TARGET_INDEX` when the task applies globally.
    pub target_index: i64,
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(target_index: Option<i64>, kind: &str, id: i64) -> GroupKey {
        GroupKey {
            target_index,
            kind: kind.to_string(),
            id: TaskId(id),
        }
    }

    #[test]
    fn test_group_key_orders_absent_index_first() {
        let mut keys = vec![
            key(Some(2), "a", 1),
            key(None, "z", 9),
            key(Some(1), "b", 3),
            key(Some(1), "a", 7),
            key(Some(1), "a", 4),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                key(None, "z", 9),
                key(Some(1), "a", 4),
                key(Some(1), "a", 7),
                key(Some(1), "b", 3),
                key(Some(2), "a", 1),
            ]
        );
    }

    #[test]
    fn test_exact_range_contains() {
        let range = GroupRange::Exact {
            target_index: Some(1),
            kind: "a".to_string(),
        };
        assert!(range.contains(&key(Some(1), "a", 10)));
        assert!(!range.contains(&key(Some(1), "b", 10)));
        assert!(!range.contains(&key(None, "a", 10)));
        assert!(GroupRange::All.contains(&key(None, "a", 10)));
    }
}
