//! Common test infrastructure
//!
//! Fixtures for driving a `TaskQueue` against a real SQLite table, and a
//! table decorator that simulates rows claimed by a concurrent session.

mod fixtures;

pub use fixtures::{always, new_conn, pending_ids, remove_task, touch_task, ConflictingTable};
