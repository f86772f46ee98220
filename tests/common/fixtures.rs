use docstore_tasks::tasks::{
    GroupKey, GroupRange, MaxTaskIdStatus, MergeWindow, NewTaskRow, RemoveFromIndexTask,
    StorageError, TaskId, TaskMetadata, TaskQueue, TaskRow, TaskTable,
    TouchReferencingDocumentsTask, TASKS_VERSIONED_SCHEMAS,
};
use rusqlite::Connection;
use std::collections::HashSet;

pub fn new_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    TASKS_VERSIONED_SCHEMAS.last().unwrap().create(&conn).unwrap();
    conn
}

/// A remove task whose weight is `count`.
pub fn remove_task(index: i64, prefix: &str, count: usize) -> RemoveFromIndexTask {
    RemoveFromIndexTask::new(index, (0..count).map(|i| format!("{prefix}/{i}")))
}

pub fn touch_task(index: Option<i64>, prefix: &str, count: usize) -> TouchReferencingDocumentsTask {
    TouchReferencingDocumentsTask::new(index, (0..count).map(|i| (format!("{prefix}/{i}"), 1)))
}

/// A window that answers every id with the same status.
pub fn always(status: MaxTaskIdStatus) -> impl MergeWindow {
    (move |_: TaskId| status, |_: TaskId| {})
}

/// Wraps a table and fails deletes of chosen ids with a write conflict, as if
/// another session had claimed those rows. The rows stay in the inner table.
pub struct ConflictingTable<T> {
    inner: T,
    conflicting: HashSet<TaskId>,
}

impl<T: TaskTable> ConflictingTable<T> {
    pub fn new(inner: T, conflicting: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            inner,
            conflicting: conflicting.into_iter().collect(),
        }
    }
}

impl<T: TaskTable> TaskTable for ConflictingTable<T> {
    fn insert(&mut self, row: NewTaskRow) -> Result<TaskId, StorageError> {
        self.inner.insert(row)
    }

    fn first_id(&self) -> Result<Option<TaskId>, StorageError> {
        self.inner.first_id()
    }

    fn last_id(&self) -> Result<Option<TaskId>, StorageError> {
        self.inner.last_id()
    }

    fn next_by_id(&self, after: Option<TaskId>) -> Result<Option<TaskRow>, StorageError> {
        self.inner.next_by_id(after)
    }

    fn next_by_group(
        &self,
        range: &GroupRange,
        after: Option<&GroupKey>,
    ) -> Result<Option<TaskRow>, StorageError> {
        self.inner.next_by_group(range, after)
    }

    fn delete(&mut self, id: TaskId) -> Result<(), StorageError> {
        if self.conflicting.contains(&id) {
            return Err(StorageError::WriteConflict(id));
        }
        self.inner.delete(id)
    }

    fn metadata_page(
        &self,
        after: Option<TaskId>,
        limit: usize,
    ) -> Result<Vec<TaskMetadata>, StorageError> {
        self.inner.metadata_page(after, limit)
    }
}

/// Ids of every pending task, in insertion order.
pub fn pending_ids<T: TaskTable>(queue: &TaskQueue<T>) -> Vec<TaskId> {
    queue.list_pending().map(|m| m.unwrap().id).collect()
}
