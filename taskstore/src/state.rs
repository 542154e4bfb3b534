//! Namespaced lock + resume state, one JSON file per namespace under
//! `<projectRoot>/.loopwork/state/<namespace>.json`. At most one Scheduler
//! may hold a namespace's lock at a time; the lock semantics mirror the
//! JSON task store's (`lock.rs`) but are scoped per namespace rather than
//! per store document.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::lock::LockGuard;

/// Resume state captured after each scheduler iteration, so a crashed or
/// interrupted loop can report where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub last_task_ref: Option<String>,
    pub last_iteration: u32,
    pub last_output_dir: Option<PathBuf>,
    /// PID of the process that last held this namespace's lock, recorded
    /// alongside the resume state so a crash-recovery pass can tell whether
    /// the holder is still alive without parsing the lock file itself.
    pub lock_holder_pid: u32,
}

/// One namespace's lock + resume-state file.
pub struct StateStore {
    namespace: String,
    state_path: PathBuf,
    lock_path: PathBuf,
    lock_budget: Duration,
    guard: Option<LockGuard>,
}

impl StateStore {
    pub fn new(project_root: impl AsRef<Path>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let state_dir = project_root.as_ref().join(".loopwork").join("state");
        let state_path = state_dir.join(format!("{namespace}.json"));
        let lock_path = state_dir.join(format!("{namespace}.lock"));
        Self { namespace, state_path, lock_path, lock_budget: Duration::from_secs(5), guard: None }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Acquire the namespace's exclusive lock. Held until `release_lock` is
    /// called or `self` is dropped.
    pub fn acquire_lock(&mut self) -> Result<(), StateError> {
        let guard = LockGuard::acquire(&self.lock_path, self.lock_budget).map_err(|_| StateError::LockTimeout(self.lock_budget))?;
        self.guard = Some(guard);
        Ok(())
    }

    pub fn release_lock(&mut self) {
        self.guard = None;
    }

    pub fn save_state(&self, state: &LoopState) -> Result<(), StateError> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(state).map_err(|e| StateError::Corrupt(e.to_string()))?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }

    pub fn load_state(&self) -> Result<Option<LoopState>, StateError> {
        if !self.state_path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.state_path)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw).map(Some).map_err(|e| StateError::Corrupt(e.to_string()))
    }

    pub fn clear_state(&self) -> Result<(), StateError> {
        match std::fs::remove_file(&self.state_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
