//! Database schema for the tasks table.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// Pending background tasks, clustered by insertion order.
pub const TASKS_TABLE_V0: Table = Table {
    name: "tasks",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("task", &SqlType::Blob, non_null = true),
        sqlite_column!("for_index", &SqlType::Integer),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        // unix milliseconds
        sqlite_column!("added_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("by_index_and_task_type", "for_index, task_type")],
};

pub const TASKS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[TASKS_TABLE_V0],
    migration: None,
}];
