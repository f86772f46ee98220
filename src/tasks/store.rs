//! SQLite-backed task queue store.
//!
//! Owns the connection and hands out queues bound to a transaction.

use super::errors::QueueError;
use super::queue::{QueueSettings, TaskQueue};
use super::schema::TASKS_VERSIONED_SCHEMAS;
use super::sqlite_table::SqliteTaskTable;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct SqliteTaskQueueStore {
    conn: Arc<Mutex<Connection>>,
    settings: QueueSettings,
}

impl SqliteTaskQueueStore {
    /// Open an existing tasks database or create a new one with the current
    /// schema.
    pub fn new<P: AsRef<Path>>(db_path: P, settings: QueueSettings) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            TASKS_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new tasks database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Tasks database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = TASKS_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Tasks database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        TASKS_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;
        info!(
            "Opened tasks database at {:?} (schema version {})",
            db_path.as_ref(),
            version
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            settings,
        })
    }

    /// A store backed by a private in-memory database.
    pub fn in_memory(settings: QueueSettings) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        TASKS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            settings,
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = TASKS_VERSIONED_SCHEMAS.len() - 1;
        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating tasks database from version {} to {}",
            current_version, target_version
        );
        for schema in TASKS_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                migration_fn(conn).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;
        Ok(())
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Run `f` against a queue inside one transaction, committed only when
    /// `f` succeeds.
    pub fn batch<R, F>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&mut TaskQueue<SqliteTaskTable<'_>>) -> Result<R, QueueError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = {
            let mut queue = TaskQueue::with_settings(SqliteTaskTable::new(&tx), self.settings.clone());
            f(&mut queue)?
        };
        tx.commit()?;
        Ok(result)
    }

    /// Run `f` inside a transaction that is always rolled back.
    pub fn read<R, F>(&self, f: F) -> Result<R, QueueError>
    where
        F: FnOnce(&TaskQueue<SqliteTaskTable<'_>>) -> Result<R, QueueError>,
    {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let queue = TaskQueue::with_settings(SqliteTaskTable::new(&tx), self.settings.clone());
        f(&queue)
    }
}
