//! The `Store` contract: every backing implementation (the JSON file store,
//! the fallback wrapper) satisfies this trait, and the scheduler only ever
//! depends on the trait object so a fallback can swap in transparently.

use async_trait::async_trait;

use crate::domain::{Filter, NewTask, Priority, Task, TaskStatus};
use crate::error::StoreError;

/// Result of `Store::ping`: reachability plus round-trip latency, per
/// `ping() -> {ok, latencyMs, error?}`. `error` is carried on the `Err`
/// side of the `Result` this is wrapped in, not as a field here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingResult {
    pub ok: bool,
    pub latency_ms: u64,
}

/// Operations a task store must provide. Mutating operations validate the
/// state transition they perform and return `StoreError::InvalidState` if
/// the task is not in a state that permits it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Return the highest-priority pending task whose dependencies are met
    /// and whose `scheduled_for` (if any) has passed, ordered by priority
    /// bucket then ascending id. `None` if the backlog has nothing runnable.
    async fn find_next_task(&self, filter: &Filter) -> Result<Option<Task>, StoreError>;

    async fn get_task(&self, id: &str) -> Result<Task, StoreError>;

    async fn list_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError>;

    async fn list_pending_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError>;

    async fn count_pending(&self, filter: &Filter) -> Result<usize, StoreError>;

    /// pending -> in-progress.
    async fn mark_in_progress(&self, id: &str) -> Result<Task, StoreError>;

    /// in-progress -> completed.
    async fn mark_completed(&self, id: &str) -> Result<Task, StoreError>;

    /// in-progress -> failed (or quarantined, if the per-task failure count
    /// has reached the store's quarantine threshold).
    async fn mark_failed(&self, id: &str, error: &str) -> Result<Task, StoreError>;

    /// failed -> quarantined, bypassing the retry counter.
    async fn mark_quarantined(&self, id: &str, error: &str) -> Result<Task, StoreError>;

    /// failed|quarantined|in-progress -> pending, preserving the failure
    /// count and history. Used to recover orphaned in-progress tasks at
    /// startup.
    async fn reset_to_pending(&self, id: &str) -> Result<Task, StoreError>;

    /// completed -> pending, with a new `scheduled_for`.
    async fn reschedule_completed(&self, id: &str, scheduled_for: chrono::DateTime<chrono::Utc>) -> Result<Task, StoreError>;

    async fn add_comment(&self, id: &str, message: &str) -> Result<Task, StoreError>;

    async fn set_priority(&self, id: &str, priority: Priority) -> Result<Task, StoreError>;

    async fn create_task(&self, new_task: NewTask) -> Result<Task, StoreError>;

    async fn create_sub_task(&self, parent_id: &str, new_task: NewTask) -> Result<Task, StoreError>;

    async fn add_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError>;

    async fn remove_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError>;

    async fn get_sub_tasks(&self, parent_id: &str) -> Result<Vec<Task>, StoreError>;

    async fn get_dependencies(&self, id: &str) -> Result<Vec<Task>, StoreError>;

    async fn get_dependents(&self, id: &str) -> Result<Vec<Task>, StoreError>;

    async fn are_dependencies_met(&self, id: &str) -> Result<bool, StoreError>;

    /// Cheap liveness probe: reports reachability and round-trip latency
    /// without taking the write lock. Used by the fallback wrapper's health
    /// check and by the plugin bus's built-in backend-readiness plugin.
    async fn ping(&self) -> Result<PingResult, StoreError>;
}

/// Whether `from` may transition to `to` under the task state machine.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Quarantined)
            | (InProgress, Pending)
            | (Failed, Pending)
            | (Failed, Quarantined)
            | (Quarantined, Pending)
            | (Quarantined, Failed)
            | (Completed, Pending)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_in_progress_is_valid() {
        assert!(is_valid_transition(TaskStatus::Pending, TaskStatus::InProgress));
    }

    #[test]
    fn pending_to_completed_is_invalid() {
        assert!(!is_valid_transition(TaskStatus::Pending, TaskStatus::Completed));
    }

    #[test]
    fn quarantined_only_escapes_via_reset() {
        assert!(is_valid_transition(TaskStatus::Quarantined, TaskStatus::Pending));
        assert!(!is_valid_transition(TaskStatus::Quarantined, TaskStatus::InProgress));
        assert!(!is_valid_transition(TaskStatus::Quarantined, TaskStatus::Completed));
    }
}
