use super::models::TaskId;
use thiserror::Error;

/// Failures reported by the task table.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Another session already removed the row. The queue treats it as "this
    /// row was taken" and never surfaces it.
    #[error("write conflict on task {0}")]
    WriteConflict(TaskId),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Failures turning a task into bytes and back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no task type registered for kind '{0}'")]
    UnknownKind(String),

    #[error("malformed '{kind}' payload: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize '{kind}' task: {source}")]
    Serialize {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors surfaced to callers of the queue.
///
/// Write conflicts and deserialization faults are recovered inside the queue
/// and never show up here.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Storage(StorageError::Sqlite(e))
    }
}
