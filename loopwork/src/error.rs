//! Loopwork error taxonomy: one `thiserror` enum per subsystem, the same
//! pattern `taskstore::error` and the teacher's `LlmError` use, plus a
//! top-level `LoopworkError` that `main` collapses into with `eyre`.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the CLI Executor (`crate::executor`).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no AI CLI tool found on PATH or in well-known install directories")]
    NoCLIFound,

    #[error("failed to spawn subprocess: {0}")]
    SpawnFailed(String),

    #[error("subprocess timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("quota exhausted for current (tool, model) pool")]
    QuotaExhausted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// Whether the scheduler should treat this as a transient condition
    /// worth retrying rather than failing the task outright.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutorError::RateLimited { .. } | ExecutorError::Timeout(_))
    }
}

/// Errors raised by the scheduler/loop (`crate::scheduler`).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("backlog empty")]
    BacklogEmpty,

    #[error("circuit breaker open after {0} consecutive failures")]
    CircuitOpen(u32),

    #[error("dependencies not met for task {0}")]
    DependencyUnmet(String),

    #[error("resume state missing for namespace {0}")]
    ResumeStateMissing(String),

    #[error(transparent)]
    Store(#[from] taskstore::StoreError),

    #[error(transparent)]
    State(#[from] taskstore::StateError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl SchedulerError {
    /// Whether this is a normal, non-error termination of the loop.
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, SchedulerError::BacklogEmpty)
    }
}

/// Errors raised by the plugin registry/bus (`crate::plugins`).
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{name}' hook failed: {source}")]
    HookFailed { name: String, source: eyre::Report },

    #[error("critical plugin '{name}' interceptor hook failed: {source}")]
    InterceptorFailed { name: String, source: eyre::Report },
}

impl PluginError {
    pub fn is_critical(&self) -> bool {
        matches!(self, PluginError::InterceptorFailed { .. })
    }
}

/// Errors raised by the process supervisor (`crate::supervisor`).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("a loop is already running for namespace '{0}'")]
    AlreadyRunning(String),

    #[error("no loop is running for namespace '{0}'")]
    NotRunning(String),

    #[error("process for namespace '{0}' did not stop within the timeout")]
    StopTimeout(String),

    #[error("failed to spawn loop process: {0}")]
    ProcessSpawnFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error the binary's `main` collapses every subsystem error into.
#[derive(Debug, Error)]
pub enum LoopworkError {
    #[error(transparent)]
    Store(#[from] taskstore::StoreError),

    #[error(transparent)]
    State(#[from] taskstore::StateError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        let err = ExecutorError::RateLimited { retry_after: Duration::from_secs(30) };
        assert!(err.is_retryable());
    }

    #[test]
    fn spawn_failed_is_not_retryable() {
        let err = ExecutorError::SpawnFailed("no such file".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn backlog_empty_is_terminal_ok() {
        assert!(SchedulerError::BacklogEmpty.is_terminal_ok());
        assert!(!SchedulerError::CircuitOpen(5).is_terminal_ok());
    }
}
