//! The task-value side of the queue: what every task kind must provide, and
//! the byte codec used for the `task` column.

use super::errors::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A kind of background task that can be stored in the queue.
///
/// The kind string is persisted with every row and is how a row is matched
/// back to its Rust type, so it must never change once rows exist.
pub trait QueueTask: Serialize + DeserializeOwned + Send + 'static {
    const KIND: &'static str;

    /// Index this task applies to, `None` when it applies globally.
    fn target_index(&self) -> Option<i64>;

    /// Whether merge candidates must share this task's target index. When
    /// false, every pending task of the same kind is mergeable.
    fn separate_by_index(&self) -> bool;

    /// Cost of running this task, e.g. the number of keys it touches.
    fn weight(&self) -> usize;

    /// Fold `other`'s work into `self`.
    fn merge(&mut self, other: Self);
}

pub fn encode<T: QueueTask>(task: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(task).map_err(|source| CodecError::Serialize {
        kind: T::KIND.to_string(),
        source,
    })
}

/// Decode a payload stored under `kind` as a `T`.
pub fn decode<T: QueueTask>(kind: &str, bytes: &[u8]) -> Result<T, CodecError> {
    if kind != T::KIND {
        return Err(CodecError::UnknownKind(kind.to_string()));
    }
    serde_json::from_slice(bytes).map_err(|source| CodecError::Malformed {
        kind: kind.to_string(),
        source,
    })
}
