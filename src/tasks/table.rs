//! Port to the ordered transactional table that stores task rows.
//!
//! Cursor movement is expressed as keyset seeks: "the first row strictly
//! after this key". A scan that deletes the row it is standing on simply
//! seeks past the deleted key next time.

use super::errors::StorageError;
use super::models::{GroupKey, GroupRange, NewTaskRow, TaskId, TaskMetadata, TaskRow};

/// Table operations the queue needs. Implementations run inside whatever
/// transaction their caller opened; they never commit.
pub trait TaskTable {
    /// Insert a row, returning its freshly assigned id.
    fn insert(&mut self, row: NewTaskRow) -> Result<TaskId, StorageError>;

    fn first_id(&self) -> Result<Option<TaskId>, StorageError>;

    fn last_id(&self) -> Result<Option<TaskId>, StorageError>;

    /// First row in insertion order with an id greater than `after`, or the
    /// very first row when `after` is `None`.
    fn next_by_id(&self, after: Option<TaskId>) -> Result<Option<TaskRow>, StorageError>;

    /// First row of the `(target_index, kind)` index inside `range` that sorts
    /// after `after`. Implementations may treat `range` as a hint; callers
    /// recheck what they get back.
    fn next_by_group(
        &self,
        range: &GroupRange,
        after: Option<&GroupKey>,
    ) -> Result<Option<TaskRow>, StorageError>;

    /// Delete one row. Fails with `StorageError::WriteConflict` when the row
    /// is already gone. Any other storage failure is returned as is.
    fn delete(&mut self, id: TaskId) -> Result<(), StorageError>;

    /// Metadata of at most `limit` rows with an id greater than `after`, in
    /// insertion order. Payloads are not read.
    fn metadata_page(
        &self,
        after: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskMetadata>, StorageError>;
}
