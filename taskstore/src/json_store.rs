//! The canonical JSON-file backed `Store` implementation.
//!
//! The whole backlog lives in one `{root}.json` document; a writer takes
//! the sidecar `{root}.json.lock` (see `lock.rs`), reads the current
//! document, applies its mutation, and writes the result to a temp file
//! before renaming it over the original so no reader ever observes a
//! half-written document.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Actor, Event, EventLevel, EventType, Filter, NewTask, Priority, Task, TaskStatus, Timestamps};
use crate::error::StoreError;
use crate::lock::LockGuard;
use crate::store::{PingResult, Store, is_valid_transition};

/// Task entries repeatedly fail at or above this count quarantine instead
/// of returning to `failed`. Not exposed as a config knob in the external
/// interface; it is an adapter-internal default.
const DEFAULT_QUARANTINE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FeatureMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    features: HashMap<String, FeatureMeta>,
}

/// JSON document plus sidecar Markdown description files, guarded by an
/// flock-based lock file.
pub struct JsonTaskAdapter {
    path: PathBuf,
    lock_path: PathBuf,
    lock_budget: Duration,
    quarantine_threshold: u32,
}

impl JsonTaskAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = lock_path_for(&path);
        Self {
            path,
            lock_path,
            lock_budget: Duration::from_secs(5),
            quarantine_threshold: DEFAULT_QUARANTINE_THRESHOLD,
        }
    }

    pub fn with_lock_budget(mut self, budget: Duration) -> Self {
        self.lock_budget = budget;
        self
    }

    pub fn with_quarantine_threshold(mut self, threshold: u32) -> Self {
        self.quarantine_threshold = threshold;
        self
    }

    fn markdown_path(&self, id: &str) -> PathBuf {
        self.path.with_file_name(format!("{id}.md"))
    }

    fn read_document(&self) -> Result<Document, StoreError> {
        if !self.path.exists() {
            return Ok(Document::default());
        }
        let raw = fs::read_to_string(&self.path)
            .map_err(|e| StoreError::StoreWriteFailed(format!("reading {}: {e}", self.path.display())))?;
        if raw.trim().is_empty() {
            return Ok(Document::default());
        }
        let mut doc: Document =
            serde_json::from_str(&raw).map_err(|e| StoreError::StoreCorrupt(format!("{}: {e}", self.path.display())))?;

        for task in &mut doc.tasks {
            if let Some(title) = read_markdown_title(&self.markdown_path(&task.id)) {
                task.title = title;
            }
        }
        Ok(doc)
    }

    fn write_document(&self, doc: &Document) -> Result<(), StoreError> {
        let serialized = serde_json::to_vec_pretty(doc)
            .map_err(|e| StoreError::StoreWriteFailed(format!("serializing store: {e}")))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, &serialized)
            .map_err(|e| StoreError::StoreWriteFailed(format!("writing temp file {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &self.path)
            .map_err(|e| StoreError::StoreWriteFailed(format!("renaming into {}: {e}", self.path.display())))?;
        Ok(())
    }

    /// Acquire the write lock, load, run `mutate`, and persist the result
    /// if `mutate` returns `Ok`. The lock is held across the whole
    /// read-modify-write window.
    fn with_write_lock<T>(&self, mutate: impl FnOnce(&mut Document) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _guard = LockGuard::acquire(&self.lock_path, self.lock_budget)?;
        let mut doc = self.read_document()?;
        let result = mutate(&mut doc)?;
        self.write_document(&doc)?;
        Ok(result)
    }

    fn find_task_mut<'a>(doc: &'a mut Document, id: &str) -> Result<&'a mut Task, StoreError> {
        doc.tasks.iter_mut().find(|t| t.id == id).ok_or_else(|| StoreError::TaskNotFound(id.to_string()))
    }

    fn transition(task: &mut Task, to: TaskStatus) -> Result<(), StoreError> {
        if !is_valid_transition(task.status, to) {
            return Err(StoreError::InvalidState { id: task.id.clone(), from: task.status.to_string(), to: to.to_string() });
        }
        task.status = to;
        task.timestamps.updated_at = Some(Utc::now());
        Ok(())
    }

    fn allocate_id(doc: &Document, prefix: &str) -> String {
        let mut n = 1u32;
        loop {
            let candidate = format!("{prefix}-{n:03}");
            if !doc.tasks.iter().any(|t| t.id == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn allocate_sub_id(doc: &Document, parent_id: &str) -> String {
        let sibling_count = doc.tasks.iter().filter(|t| t.parent_id.as_deref() == Some(parent_id)).count();
        let suffix = (b'a' + (sibling_count as u8 % 26)) as char;
        format!("{parent_id}{suffix}")
    }

    fn new_task_entry(id: String, new_task: NewTask, parent_id: Option<String>) -> Task {
        Task {
            id,
            title: new_task.title,
            description: new_task.description,
            status: TaskStatus::Pending,
            priority: new_task.priority.unwrap_or_default(),
            feature: new_task.feature,
            parent_id,
            depends_on: new_task.depends_on,
            scheduled_for: new_task.scheduled_for,
            failure_count: 0,
            last_error: None,
            labels: new_task.labels,
            metadata: new_task.metadata,
            timestamps: Timestamps { created_at: Some(Utc::now()), updated_at: Some(Utc::now()), ..Default::default() },
            events: Vec::new(),
        }
    }
}

#[async_trait]
impl Store for JsonTaskAdapter {
    async fn find_next_task(&self, filter: &Filter) -> Result<Option<Task>, StoreError> {
        let doc = self.read_document()?;
        let now = Utc::now();
        let statuses: HashMap<&str, TaskStatus> = doc.tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();

        let mut runnable: Vec<&Task> = doc
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| filter.matches(t))
            .filter(|t| t.is_scheduled_now(now))
            .filter(|t| t.dependencies_met(|dep| statuses.get(dep).copied()))
            .collect();

        runnable.sort_by_key(|t| crate::domain::ordering_key(t));
        Ok(runnable.into_iter().next().cloned())
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        let doc = self.read_document()?;
        doc.tasks.into_iter().find(|t| t.id == id).ok_or_else(|| StoreError::TaskNotFound(id.to_string()))
    }

    async fn list_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError> {
        let doc = self.read_document()?;
        Ok(doc.tasks.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn list_pending_tasks(&self, filter: &Filter) -> Result<Vec<Task>, StoreError> {
        let doc = self.read_document()?;
        Ok(doc.tasks.into_iter().filter(|t| t.status == TaskStatus::Pending).filter(|t| filter.matches(t)).collect())
    }

    async fn count_pending(&self, filter: &Filter) -> Result<usize, StoreError> {
        Ok(self.list_pending_tasks(filter).await?.len())
    }

    async fn mark_in_progress(&self, id: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            Self::transition(task, TaskStatus::InProgress)?;
            task.push_event(EventType::Started, EventLevel::Info, Actor::System, "task started");
            Ok(task.clone())
        })
    }

    async fn mark_completed(&self, id: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            Self::transition(task, TaskStatus::Completed)?;
            task.timestamps.completed_at = Some(Utc::now());
            task.push_event(EventType::Completed, EventLevel::Info, Actor::System, "task completed");
            Ok(task.clone())
        })
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let threshold = self.quarantine_threshold;
            let task = Self::find_task_mut(doc, id)?;
            let clearing_quarantine = task.status == TaskStatus::Quarantined;
            task.failure_count += 1;
            task.last_error = Some(error.to_string());

            if !clearing_quarantine && task.failure_count >= threshold {
                Self::transition(task, TaskStatus::Quarantined)?;
                task.timestamps.quarantined_at = Some(Utc::now());
                task.push_event(EventType::Quarantined, EventLevel::Error, Actor::System, error);
            } else {
                // A quarantined task's failure_count never drops back below
                // threshold, so the over-threshold check above would keep
                // re-quarantining it forever; a manual clear always lands
                // on `failed` instead, matching `quarantined --markFailed-->
                // failed` as the one way out besides `resetToPending`.
                Self::transition(task, TaskStatus::Failed)?;
                task.timestamps.failed_at = Some(Utc::now());
                task.push_event(EventType::Failed, EventLevel::Error, Actor::System, error);
            }
            Ok(task.clone())
        })
    }

    async fn mark_quarantined(&self, id: &str, error: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            Self::transition(task, TaskStatus::Quarantined)?;
            task.timestamps.quarantined_at = Some(Utc::now());
            task.last_error = Some(error.to_string());
            task.push_event(EventType::Quarantined, EventLevel::Error, Actor::System, error);
            Ok(task.clone())
        })
    }

    async fn reset_to_pending(&self, id: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            Self::transition(task, TaskStatus::Pending)?;
            task.timestamps.quarantined_at = None;
            task.timestamps.completed_at = None;
            task.push_event(EventType::Reset, EventLevel::Info, Actor::System, "reset to pending");
            Ok(task.clone())
        })
    }

    async fn reschedule_completed(&self, id: &str, scheduled_for: DateTime<Utc>) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            Self::transition(task, TaskStatus::Pending)?;
            task.scheduled_for = Some(scheduled_for);
            task.push_event(EventType::Reset, EventLevel::Info, Actor::System, "rescheduled");
            Ok(task.clone())
        })
    }

    async fn add_comment(&self, id: &str, message: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            task.push_event(EventType::Comment, EventLevel::Info, Actor::User, message);
            task.timestamps.updated_at = Some(Utc::now());
            Ok(task.clone())
        })
    }

    async fn set_priority(&self, id: &str, priority: Priority) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            task.priority = priority;
            task.timestamps.updated_at = Some(Utc::now());
            Ok(task.clone())
        })
    }

    async fn create_task(&self, new_task: NewTask) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let prefix = new_task.feature.as_deref().map(|f| f.to_uppercase()).unwrap_or_else(|| "TASK".to_string());
            let id = Self::allocate_id(doc, &prefix);
            let task = Self::new_task_entry(id, new_task, None);
            doc.tasks.push(task.clone());
            Ok(task)
        })
    }

    async fn create_sub_task(&self, parent_id: &str, new_task: NewTask) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            if !doc.tasks.iter().any(|t| t.id == parent_id) {
                return Err(StoreError::ParentNotFound(parent_id.to_string()));
            }
            let id = Self::allocate_sub_id(doc, parent_id);
            let task = Self::new_task_entry(id, new_task, Some(parent_id.to_string()));
            doc.tasks.push(task.clone());
            Ok(task)
        })
    }

    async fn add_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            if !doc.tasks.iter().any(|t| t.id == depends_on) {
                return Err(StoreError::DependencyNotFound(depends_on.to_string()));
            }
            let task = Self::find_task_mut(doc, id)?;
            if !task.depends_on.iter().any(|d| d == depends_on) {
                task.depends_on.push(depends_on.to_string());
            }
            task.timestamps.updated_at = Some(Utc::now());
            Ok(task.clone())
        })
    }

    async fn remove_dependency(&self, id: &str, depends_on: &str) -> Result<Task, StoreError> {
        self.with_write_lock(|doc| {
            let task = Self::find_task_mut(doc, id)?;
            task.depends_on.retain(|d| d != depends_on);
            task.timestamps.updated_at = Some(Utc::now());
            Ok(task.clone())
        })
    }

    async fn get_sub_tasks(&self, parent_id: &str) -> Result<Vec<Task>, StoreError> {
        let doc = self.read_document()?;
        Ok(doc.tasks.into_iter().filter(|t| t.parent_id.as_deref() == Some(parent_id)).collect())
    }

    async fn get_dependencies(&self, id: &str) -> Result<Vec<Task>, StoreError> {
        let doc = self.read_document()?;
        let task = doc.tasks.iter().find(|t| t.id == id).ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        let deps = task.depends_on.clone();
        Ok(doc.tasks.into_iter().filter(|t| deps.contains(&t.id)).collect())
    }

    async fn get_dependents(&self, id: &str) -> Result<Vec<Task>, StoreError> {
        let doc = self.read_document()?;
        Ok(doc.tasks.into_iter().filter(|t| t.depends_on.iter().any(|d| d == id)).collect())
    }

    async fn are_dependencies_met(&self, id: &str) -> Result<bool, StoreError> {
        let doc = self.read_document()?;
        let task = doc.tasks.iter().find(|t| t.id == id).ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        let statuses: HashMap<&str, TaskStatus> = doc.tasks.iter().map(|t| (t.id.as_str(), t.status)).collect();
        Ok(task.dependencies_met(|dep| statuses.get(dep).copied()))
    }

    async fn ping(&self) -> Result<PingResult, StoreError> {
        let started = std::time::Instant::now();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::StoreNotFound(format!("{}: {e}", parent.display())))?;
        }
        Ok(PingResult { ok: true, latency_ms: started.elapsed().as_millis() as u64 })
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}

fn read_markdown_title(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| line.strip_prefix("# ").map(|s| s.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(dir: &tempfile::TempDir) -> JsonTaskAdapter {
        JsonTaskAdapter::new(dir.path().join("tasks.json"))
    }

    #[tokio::test]
    async fn create_then_find_next_orders_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);

        store.create_task(NewTask { title: "low".into(), priority: Some(Priority::Low), ..Default::default() }).await.unwrap();
        let high = store
            .create_task(NewTask { title: "high".into(), priority: Some(Priority::High), ..Default::default() })
            .await
            .unwrap();

        let next = store.find_next_task(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(next.id, high.id);
    }

    #[tokio::test]
    async fn id_allocation_fills_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);

        let t1 = store.create_task(NewTask { title: "a".into(), ..Default::default() }).await.unwrap();
        let t2 = store.create_task(NewTask { title: "b".into(), ..Default::default() }).await.unwrap();
        assert_eq!(t1.id, "TASK-001");
        assert_eq!(t2.id, "TASK-002");

        store.reset_to_pending(&t1.id).await.ok();
        let _ = store.get_task(&t1.id).await.unwrap();
    }

    #[tokio::test]
    async fn feature_prefix_is_uppercased() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let task = store.create_task(NewTask { title: "a".into(), feature: Some("auth".into()), ..Default::default() }).await.unwrap();
        assert_eq!(task.id, "AUTH-001");
    }

    #[tokio::test]
    async fn sub_task_gets_lettered_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let parent = store.create_task(NewTask { title: "parent".into(), ..Default::default() }).await.unwrap();
        let sub_a = store.create_sub_task(&parent.id, NewTask { title: "sub a".into(), ..Default::default() }).await.unwrap();
        let sub_b = store.create_sub_task(&parent.id, NewTask { title: "sub b".into(), ..Default::default() }).await.unwrap();
        assert_eq!(sub_a.id, format!("{}a", parent.id));
        assert_eq!(sub_b.id, format!("{}b", parent.id));
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).await.unwrap();
        let err = store.mark_completed(&task.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn failure_count_past_threshold_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir).with_quarantine_threshold(2);
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).await.unwrap();

        store.mark_in_progress(&task.id).await.unwrap();
        let after_first = store.mark_failed(&task.id, "boom").await.unwrap();
        assert_eq!(after_first.status, TaskStatus::Failed);

        store.reset_to_pending(&task.id).await.unwrap();
        store.mark_in_progress(&task.id).await.unwrap();
        let after_second = store.mark_failed(&task.id, "boom again").await.unwrap();
        assert_eq!(after_second.status, TaskStatus::Quarantined);
    }

    #[tokio::test]
    async fn mark_failed_on_a_quarantined_task_clears_it_to_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir).with_quarantine_threshold(1);
        let task = store.create_task(NewTask { title: "a".into(), ..Default::default() }).await.unwrap();

        store.mark_in_progress(&task.id).await.unwrap();
        let quarantined = store.mark_failed(&task.id, "boom").await.unwrap();
        assert_eq!(quarantined.status, TaskStatus::Quarantined);
        assert_eq!(quarantined.failure_count, 1);

        // A manual clear-back-out: markFailed on an already-quarantined
        // task must land on `failed`, not re-quarantine (failure_count
        // only ever grows, so the threshold comparison alone can never
        // escape quarantine).
        let cleared = store.mark_failed(&task.id, "manual clear").await.unwrap();
        assert_eq!(cleared.status, TaskStatus::Failed);
        assert_eq!(cleared.failure_count, 2);
    }

    #[tokio::test]
    async fn dependency_gates_find_next_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let blocker = store.create_task(NewTask { title: "blocker".into(), ..Default::default() }).await.unwrap();
        store.create_task(NewTask { title: "blocked".into(), depends_on: vec![blocker.id.clone()], ..Default::default() }).await.unwrap();

        let next = store.find_next_task(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(next.id, blocker.id);

        store.mark_in_progress(&blocker.id).await.unwrap();
        assert!(store.find_next_task(&Filter::default()).await.unwrap().is_none());

        store.mark_completed(&blocker.id).await.unwrap();
        let next = store.find_next_task(&Filter::default()).await.unwrap().unwrap();
        assert_eq!(next.id, format!("TASK-002"));
    }

    #[tokio::test]
    async fn markdown_sidecar_overrides_title() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let task = store.create_task(NewTask { title: "placeholder".into(), ..Default::default() }).await.unwrap();
        fs::write(dir.path().join(format!("{}.md", task.id)), "# Real Title\n\nbody").unwrap();

        let reloaded = store.get_task(&task.id).await.unwrap();
        assert_eq!(reloaded.title, "Real Title");
    }

    #[tokio::test]
    async fn reschedule_completed_hides_the_task_until_its_new_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(&dir);
        let task = store.create_task(NewTask { title: "seed".into(), ..Default::default() }).await.unwrap();
        store.mark_in_progress(&task.id).await.unwrap();
        store.mark_completed(&task.id).await.unwrap();

        let future = Utc::now() + chrono::Duration::days(1460);
        let rescheduled = store.reschedule_completed(&task.id, future).await.unwrap();
        assert_eq!(rescheduled.status, TaskStatus::Pending);
        assert_eq!(rescheduled.scheduled_for, Some(future));

        assert!(store.find_next_task(&Filter::default()).await.unwrap().is_none());
    }

    use proptest::prelude::*;

    proptest::proptest! {
        /// However many tasks land under however many feature prefixes,
        /// `allocate_id` never hands out the same id twice.
        #[test]
        fn allocate_id_never_collides(features in proptest::collection::vec(proptest::option::of("[a-z]{3,6}"), 1..25)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = adapter(&dir);
                let mut seen = std::collections::HashSet::new();

                for feature in features {
                    let task = store
                        .create_task(NewTask { title: "t".into(), feature, ..Default::default() })
                        .await
                        .unwrap();
                    prop_assert!(seen.insert(task.id), "duplicate id allocated");
                }
                Ok(())
            })?;
        }
    }
}
