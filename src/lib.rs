//! Docstore Tasks Library
//!
//! Transactional background task queue with merge-on-dequeue, plus the
//! SQLite plumbing and configuration used by the `tasks-admin` tool.

pub mod config;
pub mod sqlite_persistence;
pub mod tasks;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use tasks::{
    DequeueOutcome, MaxTaskIdStatus, MergeWindow, QueueError, QueueSettings, QueueTask,
    SqliteTaskQueueStore, TaskId, TaskIdWatermark, TaskQueue,
};
