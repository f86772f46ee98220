//! The task queue: producers append, a single consumer pulls tasks of one kind
//! at a time and opportunistically merges compatible pending tasks.

use super::errors::{QueueError, StorageError};
use super::merge::MergeScanner;
use super::merge_window::{MaxTaskIdStatus, MergeWindow};
use super::models::{NewTaskRow, TaskId, TaskMetadata};
use super::table::TaskTable;
use super::task::{decode, encode, QueueTask};
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Upper bound on the accumulated weight of one merged task.
pub const DEFAULT_MERGE_WEIGHT_LIMIT: usize = 5 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub merge_weight_limit: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            merge_weight_limit: DEFAULT_MERGE_WEIGHT_LIMIT,
        }
    }
}

/// Result of `TaskQueue::dequeue_merged`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueOutcome<T> {
    /// A task, merged with whatever the window allowed.
    Task(T),
    /// A matching task exists but the merge window closed for this call.
    WindowClosed,
    /// No task of the requested kind is pending.
    Empty,
}

impl<T> DequeueOutcome<T> {
    /// True when work was seen but not handed out.
    pub fn found_work(&self) -> bool {
        matches!(self, DequeueOutcome::WindowClosed)
    }

    pub fn into_task(self) -> Option<T> {
        match self {
            DequeueOutcome::Task(task) => Some(task),
            DequeueOutcome::WindowClosed | DequeueOutcome::Empty => None,
        }
    }
}

/// Rows fetched per round trip by `list_pending`.
pub const PENDING_PAGE_SIZE: usize = 256;

/// Pending task metadata in insertion order, read from the table one page at
/// a time.
///
/// Borrows the queue, so the queue cannot change while it is being walked.
/// Each page resumes after the last id yielded.
pub struct PendingTasks<'t, Tb> {
    table: &'t Tb,
    page: std::vec::IntoIter<TaskMetadata>,
    after: Option<TaskId>,
    page_size: usize,
    exhausted: bool,
}

impl<'t, Tb: TaskTable> PendingTasks<'t, Tb> {
    fn new(table: &'t Tb, page_size: usize) -> Self {
        Self {
            table,
            page: Vec::new().into_iter(),
            after: None,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }
}

impl<Tb: TaskTable> Iterator for PendingTasks<'_, Tb> {
    type Item = Result<TaskMetadata, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(task) = self.page.next() {
                self.after = Some(task.id);
                return Some(Ok(task));
            }
            if self.exhausted {
                return None;
            }
            match self.table.metadata_page(self.after, self.page_size) {
                Ok(rows) => {
                    self.exhausted = rows.len() < self.page_size;
                    self.page = rows.into_iter();
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Queue operations over a task table.
///
/// The queue never opens or commits transactions: the table it wraps is
/// already bound to the caller's transaction.
pub struct TaskQueue<Tb> {
    table: Tb,
    settings: QueueSettings,
}

impl<Tb: TaskTable> TaskQueue<Tb> {
    pub fn new(table: Tb) -> Self {
        Self::with_settings(table, QueueSettings::default())
    }

    pub fn with_settings(table: Tb, settings: QueueSettings) -> Self {
        Self { table, settings }
    }

    pub fn table(&self) -> &Tb {
        &self.table
    }

    pub fn into_table(self) -> Tb {
        self.table
    }

    /// Append a task. Duplicates are expected; merging consolidates them later.
    pub fn enqueue<T: QueueTask>(
        &mut self,
        task: &T,
        enqueued_at: DateTime<Utc>,
    ) -> Result<TaskId, QueueError> {
        let row = NewTaskRow {
            payload: encode(task)?,
            target_index: task.target_index(),
            kind: T::KIND.to_string(),
            enqueued_at,
        };
        let id = self.table.insert(row)?;
        debug!("Enqueued '{}' task {} for index {:?}", T::KIND, id, task.target_index());
        Ok(id)
    }

    pub fn has_pending(&self) -> Result<bool, QueueError> {
        Ok(self.table.first_id()?.is_some())
    }

    /// Span of ids between the oldest and newest pending rows.
    ///
    /// Exact while nothing has been removed from the middle of the queue,
    /// too large otherwise. Good enough for backlog metrics, nothing else.
    pub fn approximate_count(&self) -> Result<u64, QueueError> {
        let Some(first) = self.table.first_id()? else {
            return Ok(0);
        };
        let Some(last) = self.table.last_id()? else {
            return Ok(0);
        };
        Ok(u64::try_from(last.0 - first.0 + 1).unwrap_or(0))
    }

    /// Take the oldest pending task of kind `T`, merging similar tasks into it
    /// when `window` allows.
    ///
    /// Rows of `T`'s kind that fail to decode are logged and left in place. A
    /// row lost to another session while being deleted is skipped and the scan
    /// moves on to the next candidate.
    pub fn dequeue_merged<T, W>(&mut self, window: &mut W) -> Result<DequeueOutcome<T>, QueueError>
    where
        T: QueueTask,
        W: MergeWindow,
    {
        let mut after = None;
        while let Some(row) = self.table.next_by_id(after)? {
            after = Some(row.id);
            if row.kind != T::KIND {
                continue;
            }

            let mut task: T = match decode(&row.kind, &row.payload) {
                Ok(task) => task,
                Err(e) => {
                    error!(
                        "Could not create instance of task {} ({} bytes): {}",
                        row.id,
                        row.payload.len(),
                        e
                    );
                    continue;
                }
            };

            match self.table.delete(row.id) {
                Ok(()) => {}
                Err(StorageError::WriteConflict(id)) => {
                    debug!("Task {} was claimed by another session, skipping it", id);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            match window.max_id_status(row.id) {
                MaxTaskIdStatus::ReachedMax => return Ok(DequeueOutcome::WindowClosed),
                MaxTaskIdStatus::Updated => {
                    let summary = MergeScanner::new(&mut self.table, self.settings.merge_weight_limit)
                        .merge_into(&mut task, window)?;
                    debug!(
                        "Merged {} '{}' tasks into task {} (weight {}, {} corrupt rows pruned)",
                        summary.absorbed,
                        T::KIND,
                        row.id,
                        summary.total_weight,
                        summary.pruned
                    );
                }
                MaxTaskIdStatus::MergeDisabled => {}
            }
            return Ok(DequeueOutcome::Task(task));
        }
        Ok(DequeueOutcome::Empty)
    }

    /// Metadata of every pending row in insertion order.
    ///
    /// Nothing is read until the sequence is advanced, and only one page of
    /// metadata is held at a time.
    pub fn list_pending(&self) -> PendingTasks<'_, Tb> {
        PendingTasks::new(&self.table, PENDING_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::kinds::{RemoveFromIndexTask, TouchReferencingDocumentsTask};
    use crate::tasks::merge_window::TaskIdWatermark;
    use crate::tasks::models::{GroupKey, GroupRange, TaskRow};
    use crate::tasks::schema::TASKS_VERSIONED_SCHEMAS;
    use crate::tasks::sqlite_table::SqliteTaskTable;
    use rusqlite::{params, Connection};
    use std::cell::Cell;

    fn new_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        TASKS_VERSIONED_SCHEMAS.last().unwrap().create(&conn).unwrap();
        conn
    }

    fn remove(index: i64, prefix: &str, count: usize) -> RemoveFromIndexTask {
        RemoveFromIndexTask::new(index, (0..count).map(|i| format!("{prefix}/{i}")))
    }

    fn always(status: MaxTaskIdStatus) -> impl MergeWindow {
        (move |_: TaskId| status, |_: TaskId| {})
    }

    #[test]
    fn test_empty_queue() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));

        assert!(!queue.has_pending().unwrap());
        assert_eq!(queue.approximate_count().unwrap(), 0);
        assert_eq!(queue.list_pending().count(), 0);

        let outcome = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::Updated))
            .unwrap();
        assert_eq!(outcome, DequeueOutcome::Empty);
        assert!(!outcome.found_work());
    }

    #[test]
    fn test_approximate_count_matches_inserts() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));

        for n in 1..=5 {
            queue.enqueue(&remove(1, "k", 1), Utc::now()).unwrap();
            assert_eq!(queue.approximate_count().unwrap(), n);
            assert!(queue.has_pending().unwrap());
        }
    }

    #[test]
    fn test_approximate_count_overestimates_after_middle_delete() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "a", 1), Utc::now()).unwrap();
        queue
            .enqueue(&TouchReferencingDocumentsTask::new(None, [("x", 1)]), Utc::now())
            .unwrap();
        queue.enqueue(&remove(1, "c", 1), Utc::now()).unwrap();

        let outcome = queue
            .dequeue_merged::<TouchReferencingDocumentsTask, _>(&mut always(
                MaxTaskIdStatus::MergeDisabled,
            ))
            .unwrap();
        assert!(outcome.into_task().is_some());

        assert_eq!(queue.list_pending().count(), 2);
        assert_eq!(queue.approximate_count().unwrap(), 3);
    }

    #[test]
    fn test_merge_disabled_returns_single_task() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        let first = remove(1, "first", 2);
        queue.enqueue(&first, Utc::now()).unwrap();
        queue.enqueue(&remove(1, "second", 3), Utc::now()).unwrap();

        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::MergeDisabled))
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task, first);
        assert_eq!(queue.list_pending().count(), 1);
    }

    #[test]
    fn test_updated_merges_same_index_only() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "a", 10), Utc::now()).unwrap();
        queue.enqueue(&remove(2, "b", 20), Utc::now()).unwrap();
        queue.enqueue(&remove(1, "c", 30), Utc::now()).unwrap();

        let mut window = TaskIdWatermark::new(None);
        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut window)
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.index, 1);
        assert_eq!(task.weight(), 40);
        assert_eq!(window.watermark(), Some(TaskId(3)));

        let pending: Vec<TaskMetadata> = queue.list_pending().collect::<Result<_, _>>().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].target_index, 2);
    }

    #[test]
    fn test_updated_merges_across_indexes_when_not_separated() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue
            .enqueue(&TouchReferencingDocumentsTask::new(Some(3), [("a", 1)]), Utc::now())
            .unwrap();
        queue.enqueue(&remove(3, "r", 4), Utc::now()).unwrap();
        queue
            .enqueue(&TouchReferencingDocumentsTask::new(None, [("b", 1)]), Utc::now())
            .unwrap();
        queue
            .enqueue(&TouchReferencingDocumentsTask::new(Some(9), [("c", 1)]), Utc::now())
            .unwrap();

        let task = queue
            .dequeue_merged::<TouchReferencingDocumentsTask, _>(&mut always(
                MaxTaskIdStatus::Updated,
            ))
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.weight(), 3);
        let pending: Vec<String> = queue.list_pending().map(|m| m.unwrap().kind).collect();
        assert_eq!(pending, vec![RemoveFromIndexTask::KIND.to_string()]);
    }

    #[test]
    fn test_reached_max_reports_found_work() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "a", 1), Utc::now()).unwrap();
        queue.enqueue(&remove(1, "b", 1), Utc::now()).unwrap();

        let mut updates = Vec::new();
        let outcome = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut (
                |_: TaskId| MaxTaskIdStatus::ReachedMax,
                |id: TaskId| updates.push(id),
            ))
            .unwrap();

        assert_eq!(outcome, DequeueOutcome::WindowClosed);
        assert!(outcome.found_work());
        assert!(updates.is_empty());
        // no merge happened, the second row is untouched
        assert_eq!(queue.list_pending().count(), 1);
    }

    #[test]
    fn test_corrupt_row_is_skipped_not_deleted() {
        let conn = new_conn();
        conn.execute(
            "INSERT INTO tasks (task, for_index, task_type, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![b"not json".to_vec(), 1, RemoveFromIndexTask::KIND, 0],
        )
        .unwrap();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        let valid = remove(1, "ok", 2);
        queue.enqueue(&valid, Utc::now()).unwrap();

        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::MergeDisabled))
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task, valid);
        let pending: Vec<TaskMetadata> = queue.list_pending().collect::<Result<_, _>>().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, TaskId(1));
    }

    #[test]
    fn test_merge_prunes_corrupt_rows() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "seed", 1), Utc::now()).unwrap();
        conn.execute(
            "INSERT INTO tasks (task, for_index, task_type, added_at) VALUES (?1, ?2, ?3, ?4)",
            params![b"{".to_vec(), 1, RemoveFromIndexTask::KIND, 0],
        )
        .unwrap();
        queue.enqueue(&remove(1, "tail", 1), Utc::now()).unwrap();

        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::Updated))
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.weight(), 2);
        assert!(!queue.has_pending().unwrap());
    }

    #[test]
    fn test_weight_limit_leaves_candidates_pending() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "a", 5000), Utc::now()).unwrap();
        queue.enqueue(&remove(1, "b", 200), Utc::now()).unwrap();
        let last = queue.enqueue(&remove(1, "c", 1), Utc::now()).unwrap();

        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::Updated))
            .unwrap()
            .into_task()
            .unwrap();

        // the second task pushes the total past the limit, the third never starts
        assert_eq!(task.weight(), 5200);
        let pending: Vec<TaskId> = queue.list_pending().map(|m| m.unwrap().id).collect();
        assert_eq!(pending, vec![last]);
    }

    #[test]
    fn test_custom_weight_limit() {
        let conn = new_conn();
        let mut queue = TaskQueue::with_settings(
            SqliteTaskTable::new(&conn),
            QueueSettings {
                merge_weight_limit: 3,
            },
        );
        for prefix in ["a", "b", "c", "d"] {
            queue.enqueue(&remove(1, prefix, 2), Utc::now()).unwrap();
        }

        let task = queue
            .dequeue_merged::<RemoveFromIndexTask, _>(&mut always(MaxTaskIdStatus::Updated))
            .unwrap()
            .into_task()
            .unwrap();

        assert_eq!(task.weight(), 4);
        assert_eq!(queue.list_pending().count(), 2);
    }

    /// Counts metadata page reads.
    struct PageCounting<'c> {
        inner: SqliteTaskTable<'c>,
        pages: Cell<usize>,
    }

    impl TaskTable for PageCounting<'_> {
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
            self.inner.delete(id)
        }

        fn metadata_page(
            &self,
            after: Option<TaskId>,
            limit: usize,
        ) -> Result<Vec<TaskMetadata>, StorageError> {
            self.pages.set(self.pages.get() + 1);
            self.inner.metadata_page(after, limit)
        }
    }

    #[test]
    fn test_list_pending_reads_pages_lazily() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(PageCounting {
            inner: SqliteTaskTable::new(&conn),
            pages: Cell::new(0),
        });
        let ids: Vec<TaskId> = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|prefix| queue.enqueue(&remove(1, prefix, 1), Utc::now()).unwrap())
            .collect();

        let mut pending = PendingTasks::new(queue.table(), 2);
        assert_eq!(queue.table().pages.get(), 0);

        assert_eq!(pending.next().unwrap().unwrap().id, ids[0]);
        assert_eq!(queue.table().pages.get(), 1);

        let rest: Vec<TaskId> = pending.map(|m| m.unwrap().id).collect();
        assert_eq!(rest, ids[1..].to_vec());
        // pages of 2, 2 and a short final page of 1
        assert_eq!(queue.table().pages.get(), 3);
    }

    #[test]
    fn test_list_pending_exact_page_multiple() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        for prefix in ["a", "b", "c", "d"] {
            queue.enqueue(&remove(1, prefix, 1), Utc::now()).unwrap();
        }

        let ids: Vec<TaskId> = PendingTasks::new(queue.table(), 2)
            .map(|m| m.unwrap().id)
            .collect();
        assert_eq!(ids, vec![TaskId(1), TaskId(2), TaskId(3), TaskId(4)]);
    }

    #[test]
    fn test_list_pending_surfaces_storage_errors() {
        let conn = new_conn();
        let mut queue = TaskQueue::new(SqliteTaskTable::new(&conn));
        queue.enqueue(&remove(1, "a", 1), Utc::now()).unwrap();
        conn.execute("DROP TABLE tasks", []).unwrap();

        let mut pending = queue.list_pending();
        assert!(matches!(pending.next(), Some(Err(QueueError::Storage(_)))));
        assert!(pending.next().is_none());
    }
}
