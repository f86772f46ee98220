//! Merge window policy.
//!
//! The scheduler owns the decision of when merging is allowed; the queue only
//! asks. `MergeWindow` is that seam.

use super::models::TaskId;

/// Answer to "what should happen with this task id?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTaskIdStatus {
    /// The merge window is closed for this call; more work is pending.
    ReachedMax,
    /// The id became the new watermark; merge similar tasks.
    Updated,
    /// Hand out the task as is.
    MergeDisabled,
}

/// Scheduler-side merge policy injected into `dequeue_merged`.
pub trait MergeWindow {
    /// Asked once for the first matching row of a dequeue call.
    fn max_id_status(&mut self, id: TaskId) -> MaxTaskIdStatus;

    /// Reported for every row absorbed by a merge.
    fn update_max_id(&mut self, id: TaskId);
}

/// A pair of closures works as a window, mostly handy in tests.
impl<S, U> MergeWindow for (S, U)
where
    S: FnMut(TaskId) -> MaxTaskIdStatus,
    U: FnMut(TaskId),
{
    fn max_id_status(&mut self, id: TaskId) -> MaxTaskIdStatus {
        (self.0)(id)
    }

    fn update_max_id(&mut self, id: TaskId) {
        (self.1)(id)
    }
}

/// Watermark kept by a scheduler across dequeue calls.
///
/// With a ceiling set, ids above it close the window: the scheduler learns
/// there is newer work and can open a fresh window on its next run.
#[derive(Debug, Clone, Default)]
pub struct TaskIdWatermark {
    merge_enabled: bool,
    ceiling: Option<TaskId>,
    watermark: Option<TaskId>,
}

impl TaskIdWatermark {
    pub fn new(ceiling: Option<TaskId>) -> Self {
        Self {
            merge_enabled: true,
            ceiling,
            watermark: None,
        }
    }

    pub fn merge_disabled() -> Self {
        Self::default()
    }

    /// Highest id handed out or absorbed so far.
    pub fn watermark(&self) -> Option<TaskId> {
        self.watermark
    }

    pub fn ceiling(&self) -> Option<TaskId> {
        self.ceiling
    }

    /// Open a new window ending at `ceiling`. The watermark is kept.
    pub fn reopen(&mut self, ceiling: Option<TaskId>) {
        self.ceiling = ceiling;
    }

    fn raise(&mut self, id: TaskId) {
        if self.watermark.map_or(true, |current| id > current) {
            self.watermark = Some(id);
        }
    }
}

impl MergeWindow for TaskIdWatermark {
    fn max_id_status(&mut self, id: TaskId) -> MaxTaskIdStatus {
        if !self.merge_enabled {
            return MaxTaskIdStatus::MergeDisabled;
        }
        if self.ceiling.is_some_and(|ceiling| id > ceiling) {
            return MaxTaskIdStatus::ReachedMax;
        }
        self.raise(id);
        MaxTaskIdStatus::Updated
    }

    fn update_max_id(&mut self, id: TaskId) {
        self.raise(id);
    }
}
