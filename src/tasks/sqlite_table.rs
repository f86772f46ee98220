//! SQLite implementation of the task table.

use super::errors::StorageError;
use super::models::{
    GroupKey, GroupRange, NewTaskRow, TaskId, TaskMetadata, TaskRow, NO_TARGET_INDEX,
};
use super::table::TaskTable;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

const ROW_COLUMNS: &str = "id, task, for_index, task_type, added_at";

/// Task table bound to a connection, normally a `rusqlite::Transaction`
/// owned by the caller.
pub struct SqliteTaskTable<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskTable<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn millis_to_datetime(id: i64, millis: i64) -> Option<DateTime<Utc>> {
        let datetime = DateTime::from_timestamp_millis(millis);
        if datetime.is_none() {
            warn!("Task {} has an out of range added_at ({})", id, millis);
        }
        datetime
    }

    fn row_to_task_row(row: &rusqlite::Row) -> rusqlite::Result<TaskRow> {
        let id: i64 = row.get("id")?;
        Ok(TaskRow {
            id: TaskId(id),
            payload: row.get("task")?,
            target_index: row.get("for_index")?,
            kind: row.get("task_type")?,
            enqueued_at: Self::millis_to_datetime(id, row.get("added_at")?),
        })
    }

    fn query_one_row(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<TaskRow>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, Self::row_to_task_row).optional()?)
    }

    fn query_id(&self, sql: &str) -> Result<Option<TaskId>, StorageError> {
        let id = self
            .conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(id.map(TaskId))
    }
}

impl TaskTable for SqliteTaskTable<'_> {
    fn insert(&mut self, row: NewTaskRow) -> Result<TaskId, StorageError> {
        self.conn.execute(
            "INSERT INTO tasks (task, for_index, task_type, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                row.payload,
                row.target_index,
                row.kind,
                row.enqueued_at.timestamp_millis()
            ],
        )?;
        Ok(TaskId(self.conn.last_insert_rowid()))
    }

    fn first_id(&self) -> Result<Option<TaskId>, StorageError> {
        self.query_id("SELECT id FROM tasks ORDER BY id ASC LIMIT 1")
    }

    fn last_id(&self) -> Result<Option<TaskId>, StorageError> {
        self.query_id("SELECT id FROM tasks ORDER BY id DESC LIMIT 1")
    }

    fn next_by_id(&self, after: Option<TaskId>) -> Result<Option<TaskRow>, StorageError> {
        self.query_one_row(
            &format!("SELECT {ROW_COLUMNS} FROM tasks WHERE id > ?1 ORDER BY id ASC LIMIT 1"),
            params![after.map_or(i64::MIN, |id| id.0)],
        )
    }

    fn next_by_group(
        &self,
        range: &GroupRange,
        after: Option<&GroupKey>,
    ) -> Result<Option<TaskRow>, StorageError> {
        match (range, after) {
            (GroupRange::Exact { target_index, kind }, after) => self.query_one_row(
                &format!(
                    r#"SELECT {ROW_COLUMNS} FROM tasks
                       WHERE for_index IS ?1 AND task_type = ?2 AND id > ?3
                       ORDER BY id ASC
                       LIMIT 1"#
                ),
                params![target_index, kind, after.map_or(i64::MIN, |key| key.id.0)],
            ),
            (GroupRange::All, None) => self.query_one_row(
                &format!(
                    "SELECT {ROW_COLUMNS} FROM tasks ORDER BY for_index, task_type, id LIMIT 1"
                ),
                [],
            ),
            // NULL sorts first, so a NULL key is followed by every non-NULL index
            (GroupRange::All, Some(key)) => self.query_one_row(
                &format!(
                    r#"SELECT {ROW_COLUMNS} FROM tasks
                       WHERE (for_index IS ?1 AND task_type = ?2 AND id > ?3)
                          OR (for_index IS ?1 AND task_type > ?2)
                          OR (?1 IS NULL AND for_index IS NOT NULL)
                          OR for_index > ?1
                       ORDER BY for_index, task_type, id
                       LIMIT 1"#
                ),
                params![key.target_index, key.kind, key.id.0],
            ),
        }
    }

    fn delete(&mut self, id: TaskId) -> Result<(), StorageError> {
        // A locked database is not a lost row; that error propagates as is
        match self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.0])?
        {
            0 => Err(StorageError::WriteConflict(id)),
            _ => Ok(()),
        }
    }

    fn metadata_page(
        &self,
        after: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskMetadata>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            r#"SELECT id, added_at, for_index, task_type FROM tasks
               WHERE id > ?1
               ORDER BY id ASC
               LIMIT ?2"#,
        )?;
        let rows = stmt
            .query_map(
                params![
                    after.map_or(i64::MIN, |id| id.0),
                    i64::try_from(limit).unwrap_or(i64::MAX)
                ],
                |row| {
                    let id: i64 = row.get(0)?;
                    Ok(TaskMetadata {
                        id: TaskId(id),
                        enqueued_at: Self::millis_to_datetime(id, row.get(1)?),
                        target_index: row.get::<_, Option<i64>>(2)?.unwrap_or(NO_TARGET_INDEX),
                        kind: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
