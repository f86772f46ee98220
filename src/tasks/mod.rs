//! Task queue module
//!
//! A durable, transactional table of pending background tasks. Producers
//! append tasks; a single consumer pulls tasks of one kind at a time, folding
//! compatible pending tasks together so the backlog stays bounded.

mod errors;
mod kinds;
mod merge;
mod merge_window;
mod models;
mod queue;
mod schema;
mod sqlite_table;
mod store;
mod table;
mod task;

pub use errors::{CodecError, QueueError, StorageError};
pub use kinds::{KnownTask, RemoveFromIndexTask, TouchReferencingDocumentsTask};
pub use merge::MergeSummary;
pub use merge_window::{MaxTaskIdStatus, MergeWindow, TaskIdWatermark};
pub use models::{
    GroupKey, GroupRange, NewTaskRow, TaskId, TaskMetadata, TaskRow, NO_TARGET_INDEX,
};
pub use queue::{
    DequeueOutcome, PendingTasks, QueueSettings, TaskQueue, DEFAULT_MERGE_WEIGHT_LIMIT,
    PENDING_PAGE_SIZE,
};
pub use schema::TASKS_VERSIONED_SCHEMAS;
pub use sqlite_table::SqliteTaskTable;
pub use store::SqliteTaskQueueStore;
pub use table::TaskTable;
pub use task::{decode, encode, QueueTask};
