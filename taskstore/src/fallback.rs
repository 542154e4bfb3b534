//! Wraps a primary and secondary store. Reads try the primary first and
//! fall through to the secondary on a connection-class failure; writes go
//! to the primary only, queued to a JSONL offline log when the primary is
//! unreachable and replayed later by `drain_offline_queue`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::{Filter, NewTask, Priority, Task};
use crate::error::StoreError;
use crate::store::{PingResult, Store};

/// A write that couldn't reach the primary store, persisted so it can be
/// replayed once the primary becomes reachable again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum QueuedWrite {
    MarkInProgress { id: String },
    MarkCompleted { id: String },
    MarkFailed { id: String, error: String },
    MarkQuarantined { id: String, error: String },
    ResetToPending { id: String },
    RescheduleCompleted { id: String, scheduled_for: DateTime<Utc> },
    AddComment { id: String, message: String },
    SetPriority { id: String, priority: Priority },
    CreateTask { new_task: NewTask },
    CreateSubTask { parent_id: String, new_task: NewTask },
    AddDependency { id: String, depends_on: String },
    RemoveDependency { id: String, depends_on: String },
}

pub struct FallbackStore {
    primary: Arc<dyn Store>,
    secondary: Arc<dyn Store>,
    queue_path: PathBuf,
    queue_lock: Mutex<()>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn Store>, secondary: Arc<dyn Store>, queue_path: impl Into<PathBuf>) -> Self {
        Self { primary, secondary, queue_path: queue_path.into(), queue_lock: Mutex::new(()) }
    }

    async fn enqueue(&self, write: QueuedWrite) -> Result<(), StoreError> {
        tracing::warn!(?write, "primary store unreachable, queueing write for replay");
        let _guard = self.queue_lock.lock().await;
        if let Some(parent) = self.queue_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let line = serde_json::to_string(&write).map_err(|e| StoreError::StoreWriteFailed(e.to_string()))?;
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)
            .await
            .map_err(|e| StoreError::StoreWriteFailed(e.to_string()))?;
        file.write_all(line.as_bytes()).await.map_err(|e| StoreError::StoreWriteFailed(e.to_string()))?;
        file.write_all(b"\n").await.map_err(|e| StoreError::StoreWriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Replay every queued write against the primary, in order, clearing
    /// the queue only after every entry has been applied successfully.
    pub async fn drain_offline_queue(&self) -> Result<usize, StoreError> {
        let _guard = self.queue_lock.lock().await;
        let contents = match tokio::fs::read_to_string(&self.queue_path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::StoreWriteFailed(e.to_string())),
        };

        let mut applied = 0;
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let write: QueuedWrite =
                serde_json::from_str(line).map_err(|e| StoreError::StoreCorrupt(format!("offline queue: {e}")))?;
            match write {
                QueuedWrite::MarkInProgress { id } => self.primary.mark_in_progress(&id).await?,
                QueuedWrite::MarkCompleted { id } => self.primary.mark_completed(&id).await?,
                QueuedWrite::MarkFailed { id, error } => self.primary.mark_failed(&id, &error).await?,
                QueuedWrite::MarkQuarantined { id, error } => self.primary.mark_quarantined(&id, &error).await?,
                QueuedWrite::ResetToPending { id } => self.primary.reset_to_pending(&id).await?,
                QueuedWrite::RescheduleCompleted { id, scheduled_for } => {
                    self.primary.reschedule_completed(&id, scheduled_for).await?
                }
                QueuedWrite::AddComment { id, message } => self.primary.add_comment(&id, &message).await?,
                QueuedWrite::SetPriority { id, priority } => self.primary.set_priority(&id, priority).await?,
                QueuedWrite::CreateTask { new_task } => self.primary.create_task(new_task).await?,
                QueuedWrite::CreateSubTask { parent_id, new_task } => {
                    self.primary.create_sub_task(&parent_id, new_task).await?
                }
                QueuedWrite::AddDependency { id, depends_on } => self.primary.add_dependency(&id, &depends_on).await?,
                QueuedWrite::RemoveDependency { id, depends_on } => {
                    self.primary.remove_dependency(&id, &depends_on).await?
                }
            };
            applied += 1;
        }

        tokio::fs::remove_file(&self.queue_path).await.ok();
        Ok(applied)
    }
}

macro_rules! read_with_fallback {
    ($self:ident, $method:ident $(, $arg:expr)*) => {{
        match $self.primary.$method($($arg),*).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_connection_class() => $self.secondary.$method($($arg),*).await,
            Err(e) => Err(e),
        }
    }};
}

#[async_trait]
impl Store for FallbackStore {
    async fn find_next_task(&self, filter: &Filter) -> Result<Option<Task>, StoreError> {
        read_with_fallback!(self, find_next_task, filter)
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        read_with_fallback!(self, get_task, id)
    }

    async fn list_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError> {
        read_with_fallback!(self, list_tasks, filter)
    }

    async fn list_pending_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError> {
        read_with_fallback!(self, list_pending_tasks, filter)
    }

    async fn count_pending(&self, filter: &Filter) -> Result<usize, StoreError> {
        read_with_fallback!(self, count_pending, filter)
    }

    async fn mark_in_progress(&self, id: &str) -> Result<Task, StoreError> {
        match self.primary.mark_in_progress(id).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::MarkInProgress { id: id.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn mark_completed(&self, id: &str) -> Result<Task, StoreError> {
        match self.primary.mark_completed(id).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::MarkCompleted { id: id.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<Task, StoreError> {
        match self.primary.mark_failed(id, error).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::MarkFailed { id: id.to_string(), error: error.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn mark_quarantined(&self, id: &str, error: &str) -> Result<Task, StoreError> {
        match self.primary.mark_quarantined(id, error).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::MarkQuarantined { id: id.to_string(), error: error.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn reset_to_pending(&self, id: &str) -> Result<Task, StoreError> {
        match self.primary.reset_to_pending(id).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::ResetToPending { id: id.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn reschedule_completed(&self, id: &str, scheduled_for: DateTime<Utc>) -> Result<Task, StoreError> {
        match self.primary.reschedule_completed(id, scheduled_for).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::RescheduleCompleted { id: id.to_string(), scheduled_for }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn add_comment(&self, id: &str, message: &str) -> Result<Task, StoreError> {
        match self.primary.add_comment(id, message).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::AddComment { id: id.to_string(), message: message.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn set_priority(&self, id: &str, priority: Priority) -> Result<Task, StoreError> {
        match self.primary.set_priority(id, priority).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::SetPriority { id: id.to_string(), priority }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task, StoreError> {
        match self.primary.create_task(new_task.clone()).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::CreateTask { new_task: new_task.clone() }).await?;
                self.secondary.create_task(new_task).await
            }
            other => other,
        }
    }

    async fn create_sub_task(&self, parent_id: &str, new_task: NewTask) -> Result<Task, StoreError> {
        match self.primary.create_sub_task(parent_id, new_task.clone()).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::CreateSubTask { parent_id: parent_id.to_string(), new_task: new_task.clone() }).await?;
                self.secondary.create_sub_task(parent_id, new_task).await
            }
            other => other,
        }
    }

    async fn add_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError> {
        match self.primary.add_dependency(id, depends_on).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::AddDependency { id: id.to_string(), depends_on: depends_on.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn remove_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError> {
        match self.primary.remove_dependency(id, depends_on).await {
            Err(e) if e.is_connection_class() => {
                self.enqueue(QueuedWrite::RemoveDependency { id: id.to_string(), depends_on: depends_on.to_string() }).await?;
                self.secondary.get_task(id).await
            }
            other => other,
        }
    }

    async fn get_sub_tasks(&self, parent_id: &str) -> Result<Vec<Task>, StoreError> {
        read_with_fallback!(self, get_sub_tasks, parent_id)
    }

    async fn get_dependencies(&self, id: &str) -> Result<Vec<Task>, StoreError> {
        read_with_fallback!(self, get_dependencies, id)
    }

    async fn get_dependents(&self, id: &str) -> Result<Vec<Task>, StoreError> {
        read_with_fallback!(self, get_dependents, id)
    }

    async fn are_dependencies_met(&self, id: &str) -> Result<bool, StoreError> {
        read_with_fallback!(self, are_dependencies_met, id)
    }

    async fn ping(&self) -> Result<PingResult, StoreError> {
        match self.primary.ping().await {
            Ok(result) => Ok(result),
            Err(e) if e.is_connection_class() => self.secondary.ping().await,
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_store::JsonTaskAdapter;

    /// Always reports the store as unreachable, to exercise the fallback
    /// and offline-queue paths without depending on filesystem failure modes.
    struct UnreachableStore;

    #[async_trait]
    impl Store for UnreachableStore {
        async fn find_next_task(&self, _filter: &Filter) -> Result<Option<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn get_task(&self, _id: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn list_tasks(&self, _filter: &Filter) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn list_pending_tasks(&self, _filter: &Filter) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn count_pending(&self, _filter: &Filter) -> Result<usize, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn mark_in_progress(&self, _id: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn mark_completed(&self, _id: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn mark_failed(&self, _id: &str, _error: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn mark_quarantined(&self, _id: &str, _error: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn reset_to_pending(&self, _id: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn reschedule_completed(&self, _id: &str, _scheduled_for: DateTime<Utc>) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn add_comment(&self, _id: &str, _message: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn set_priority(&self, _id: &str, _priority: Priority) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn create_task(&self, _new_task: NewTask) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn create_sub_task(&self, _parent_id: &str, _new_task: NewTask) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn add_dependency(&self, _id: &str, _depends_on: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn remove_dependency(&self, _id: &str, _depends_on: &str) -> Result<Task, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn get_sub_tasks(&self, _parent_id: &str) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn get_dependencies(&self, _id: &str) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn get_dependents(&self, _id: &str) -> Result<Vec<Task>, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn are_dependencies_met(&self, _id: &str) -> Result<bool, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
        async fn ping(&self) -> Result<PingResult, StoreError> {
            Err(StoreError::StoreNotFound("unreachable".into()))
        }
    }

    #[tokio::test]
    async fn reads_fall_through_to_secondary_when_primary_unreachable() {
        let secondary_dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(JsonTaskAdapter::new(secondary_dir.path().join("tasks.json")));
        let task = secondary.create_task(NewTask { title: "from secondary".into(), ..Default::default() }).await.unwrap();

        let primary = Arc::new(UnreachableStore);
        let queue_dir = tempfile::tempdir().unwrap();
        let fallback = FallbackStore::new(primary, secondary, queue_dir.path().join("queue.jsonl"));

        let fetched = fallback.get_task(&task.id).await.unwrap();
        assert_eq!(fetched.id, task.id);
    }

    #[tokio::test]
    async fn write_against_unreachable_primary_is_queued() {
        let secondary_dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(JsonTaskAdapter::new(secondary_dir.path().join("tasks.json")));
        let task = secondary.create_task(NewTask { title: "t".into(), ..Default::default() }).await.unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue_path = queue_dir.path().join("queue.jsonl");
        let fallback = FallbackStore::new(Arc::new(UnreachableStore), Arc::clone(&secondary) as Arc<dyn Store>, queue_path.clone());

        fallback.mark_in_progress(&task.id).await.unwrap();
        let contents = std::fs::read_to_string(&queue_path).unwrap();
        assert!(contents.contains(&task.id));
    }

    #[tokio::test]
    async fn set_priority_against_unreachable_primary_is_queued_and_replayed() {
        let secondary_dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(JsonTaskAdapter::new(secondary_dir.path().join("tasks.json")));
        let task = secondary.create_task(NewTask { title: "t".into(), ..Default::default() }).await.unwrap();

        let primary_dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(JsonTaskAdapter::new(primary_dir.path().join("tasks.json")));
        primary.create_task(NewTask { title: "t".into(), ..Default::default() }).await.unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue_path = queue_dir.path().join("queue.jsonl");
        let unreachable = FallbackStore::new(Arc::new(UnreachableStore), Arc::clone(&secondary) as Arc<dyn Store>, queue_path.clone());
        unreachable.set_priority(&task.id, Priority::High).await.unwrap();
        let contents = std::fs::read_to_string(&queue_path).unwrap();
        assert!(contents.contains("set_priority"));

        // Replay against a primary that actually has the task.
        std::fs::write(&queue_path, format!("{{\"op\":\"set_priority\",\"id\":\"{}\",\"priority\":\"high\"}}\n", task.id)).unwrap();
        let reachable = FallbackStore::new(Arc::clone(&primary) as Arc<dyn Store>, secondary, queue_path.clone());
        let drained = reachable.drain_offline_queue().await.unwrap();
        assert_eq!(drained, 1);
        let reloaded = primary.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.priority, Priority::High);
    }

    #[tokio::test]
    async fn create_task_against_unreachable_primary_is_queued_and_falls_through_to_secondary() {
        let secondary_dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(JsonTaskAdapter::new(secondary_dir.path().join("tasks.json")));

        let queue_dir = tempfile::tempdir().unwrap();
        let queue_path = queue_dir.path().join("queue.jsonl");
        let fallback = FallbackStore::new(Arc::new(UnreachableStore), Arc::clone(&secondary) as Arc<dyn Store>, queue_path.clone());

        let created = fallback.create_task(NewTask { title: "queued creation".into(), ..Default::default() }).await.unwrap();
        assert_eq!(created.title, "queued creation");
        let contents = std::fs::read_to_string(&queue_path).unwrap();
        assert!(contents.contains("create_task"));
    }

    #[tokio::test]
    async fn drain_replays_queued_writes_against_primary() {
        let primary_dir = tempfile::tempdir().unwrap();
        let primary = Arc::new(JsonTaskAdapter::new(primary_dir.path().join("tasks.json")));
        let task = primary.create_task(NewTask { title: "t".into(), ..Default::default() }).await.unwrap();

        let secondary_dir = tempfile::tempdir().unwrap();
        let secondary = Arc::new(JsonTaskAdapter::new(secondary_dir.path().join("tasks.json")));

        let queue_dir = tempfile::tempdir().unwrap();
        let queue_path = queue_dir.path().join("queue.jsonl");
        std::fs::write(&queue_path, format!("{{\"op\":\"mark_in_progress\",\"id\":\"{}\"}}\n", task.id)).unwrap();

        let fallback = FallbackStore::new(Arc::clone(&primary) as Arc<dyn Store>, secondary, queue_path.clone());
        let drained = fallback.drain_offline_queue().await.unwrap();
        assert_eq!(drained, 1);
        assert!(!queue_path.exists());

        let reloaded = primary.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.status, crate::domain::TaskStatus::InProgress);
    }
}
