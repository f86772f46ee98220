//! Merge scanner: folds pending rows of the same kind into a task that was
//! just taken off the queue.

use super::errors::StorageError;
use super::merge_window::MergeWindow;
use super::models::{GroupKey, GroupRange};
use super::table::TaskTable;
use super::task::{decode, QueueTask};
use tracing::{debug, error};

/// What a merge pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Rows folded into the seed task and deleted.
    pub absorbed: usize,
    /// Undecodable rows deleted along the way.
    pub pruned: usize,
    /// Weight of the seed task after merging.
    pub total_weight: usize,
}

pub(crate) struct MergeScanner<'t, Tb> {
    table: &'t mut Tb,
    weight_limit: usize,
}

impl<'t, Tb: TaskTable> MergeScanner<'t, Tb> {
    pub(crate) fn new(table: &'t mut Tb, weight_limit: usize) -> Self {
        Self {
            table,
            weight_limit,
        }
    }

    /// Absorb pending rows compatible with `task` until the weight limit is
    /// reached or the candidates run out.
    ///
    /// The limit is checked before each candidate, so the last absorbed row
    /// can push the total past it.
    pub(crate) fn merge_into<T: QueueTask, W: MergeWindow>(
        &mut self,
        task: &mut T,
        window: &mut W,
    ) -> Result<MergeSummary, StorageError> {
        let range = if task.separate_by_index() {
            GroupRange::Exact {
                target_index: task.target_index(),
                kind: T::KIND.to_string(),
            }
        } else {
            GroupRange::All
        };

        let mut summary = MergeSummary {
            total_weight: task.weight(),
            ..Default::default()
        };
        let mut after: Option<GroupKey> = None;

        loop {
            if summary.total_weight >= self.weight_limit {
                debug!(
                    "Merge of '{}' stopped at weight {} (limit {})",
                    T::KIND,
                    summary.total_weight,
                    self.weight_limit
                );
                break;
            }

            let Some(row) = self.table.next_by_group(&range, after.as_ref())? else {
                break;
            };
            let key = row.group_key();
            after = Some(key.clone());

            // The range is only a hint for the table
            if row.kind != T::KIND || !range.contains(&key) {
                continue;
            }

            let other: T = match decode(&row.kind, &row.payload) {
                Ok(other) => other,
                Err(e) => {
                    error!(
                        "Could not create instance of task {} ({} bytes), deleting it: {}",
                        row.id,
                        row.payload.len(),
                        e
                    );
                    match self.table.delete(row.id) {
                        Ok(()) => summary.pruned += 1,
                        Err(StorageError::WriteConflict(id)) => {
                            debug!("Corrupt task {} was already removed by another session", id)
                        }
                        Err(e) => return Err(e),
                    }
                    continue;
                }
            };

            match self.table.delete(row.id) {
                Ok(()) => {}
                Err(StorageError::WriteConflict(id)) => {
                    debug!("Task {} was claimed by another session, not merging it", id);
                    continue;
                }
                Err(e) => return Err(e),
            }

            window.update_max_id(row.id);
            summary.total_weight += other.weight();
            task.merge(other);
            summary.absorbed += 1;
        }

        Ok(summary)
    }
}
