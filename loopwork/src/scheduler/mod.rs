//! Scheduler / Loop (§4.7): a single-threaded cooperative control loop that
//! repeatedly selects a runnable task, dispatches it to the CLI Executor,
//! and interprets the outcome against the retry counter and circuit
//! breaker. Suspension points are exactly subprocess I/O, store I/O, the
//! fixed inter-attempt sleeps, and plugin hook awaits — nothing else
//! yields inside an iteration's critical section.

pub mod retry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskstore::{Filter, Store, StoreError};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ExecutorError, SchedulerError};
use crate::executor::Executor;
use crate::plugins::{LoopStats, Registry, TaskContext};
use crate::prompt::{self, RetryContext};
use retry::{CircuitBreaker, RetryCounter};

/// How the loop stopped, surfaced to the CLI layer to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    BacklogEmpty,
    IterationCapReached,
    CircuitOpen,
    Interrupted,
}

/// Tail length, in bytes, kept from a failed attempt's output to seed the
/// next attempt's `Previous Attempt Context` section.
const RETRY_CONTEXT_TAIL_BYTES: usize = 1024;

pub struct Scheduler {
    store: Arc<dyn Store>,
    state_store: taskstore::StateStore,
    executor: Executor,
    registry: Registry,
    config: Config,
    run_dir: PathBuf,
    session_id: String,
    retry_counter: RetryCounter,
    circuit_breaker: CircuitBreaker,
    stats: LoopStats,
    pending_retry_context: Option<RetryContext>,
}

impl Scheduler {
    pub fn new(config: Config, store: Arc<dyn Store>, state_store: taskstore::StateStore, executor: Executor, registry: Registry) -> Self {
        let session_id = uuid::Uuid::now_v7().to_string();
        let run_dir = config.runs_dir().join(Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
        Self {
            store,
            state_store,
            executor,
            registry,
            config,
            run_dir,
            session_id,
            retry_counter: RetryCounter::new(),
            circuit_breaker: CircuitBreaker::new(0),
            stats: LoopStats::default(),
            pending_retry_context: None,
        }
    }

    fn prompt_log_path(&self, iteration: u32) -> PathBuf {
        self.run_dir.join("logs").join(format!("iteration-{iteration}-prompt.md"))
    }

    fn output_log_path(&self, iteration: u32) -> PathBuf {
        self.run_dir.join("logs").join(format!("iteration-{iteration}-output.txt"))
    }

    /// Run the loop to completion. `starting_task` selects the id to fetch
    /// on the very first iteration instead of calling `findNextTask`.
    pub async fn run(&mut self, starting_task: Option<String>) -> Result<StopReason, SchedulerError> {
        self.circuit_breaker = CircuitBreaker::new(self.config.circuit_breaker_threshold);
        self.state_store.acquire_lock()?;
        let result = self.run_inner(starting_task).await;
        self.state_store.release_lock();
        result
    }

    async fn run_inner(&mut self, mut starting_task: Option<String>) -> Result<StopReason, SchedulerError> {
        self.registry.on_loop_start(&self.config.namespace).await?;

        let mut iteration: u32 = 0;
        let filter = Filter { feature: self.config.feature.clone(), ..Default::default() };

        let stop_reason = loop {
            // Step 1: circuit breaker.
            if self.circuit_breaker.is_open() {
                break StopReason::CircuitOpen;
            }
            if iteration >= self.config.max_iterations {
                break StopReason::IterationCapReached;
            }

            // Step 2: reset rotator fallback for this task's attempts.
            self.executor.reset_rotator_fallback();

            // Step 3: choose the task.
            let task = match starting_task.take() {
                Some(id) => match self.store.get_task(&id).await {
                    Ok(task) if self.store.are_dependencies_met(&task.id).await.unwrap_or(false) || task.depends_on.is_empty() => task,
                    Ok(task) => {
                        warn!(task_id = %task.id, "starting task has unmet dependencies, falling back to findNextTask");
                        match self.store.find_next_task(&filter).await? {
                            Some(task) => task,
                            None => break StopReason::BacklogEmpty,
                        }
                    }
                    Err(StoreError::TaskNotFound(_)) => match self.store.find_next_task(&filter).await? {
                        Some(task) => task,
                        None => break StopReason::BacklogEmpty,
                    },
                    Err(e) => return Err(e.into()),
                },
                None => match self.store.find_next_task(&filter).await? {
                    Some(task) => task,
                    None => break StopReason::BacklogEmpty,
                },
            };

            // Step 4: persist resume state.
            let state = taskstore::LoopState {
                session_id: self.session_id.clone(),
                started_at: Utc::now(),
                last_task_ref: Some(task.id.clone()),
                last_iteration: iteration,
                last_output_dir: Some(self.output_log_path(iteration)),
                lock_holder_pid: std::process::id(),
            };
            self.state_store.save_state(&state)?;

            // Step 5: dry run short-circuits before any mutation.
            if self.config.dry_run {
                info!(task_id = %task.id, iteration, "dry run: would dispatch this task");
                iteration += 1;
                continue;
            }

            // Step 6: mark in-progress, fire onTaskStart.
            self.store.mark_in_progress(&task.id).await?;
            let context = TaskContext { task_id: task.id.clone(), iteration, namespace: self.config.namespace.clone() };
            self.registry.on_task_start(&context).await?;

            // Step 7: build the prompt.
            let retry_context = self.pending_retry_context.take();
            let prompt_text = prompt::build_prompt(&task, retry_context.as_ref());
            if let Some(parent) = self.prompt_log_path(iteration).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(ExecutorError::Io)?;
            }
            tokio::fs::write(self.prompt_log_path(iteration), &prompt_text).await.map_err(ExecutorError::Io)?;

            // Step 8: invoke the executor.
            let timeout = Duration::from_secs(self.config.timeout);
            let run_result = self.executor.run(&prompt_text, &self.output_log_path(iteration), timeout).await;

            // Step 9: interpret the outcome.
            let (succeeded, output_tail, error_message) = match run_result {
                Ok(result) if matches!(result.classification, crate::executor::Classification::Success) => (true, result.output_tail, None),
                Ok(result) => {
                    let message = match &result.classification {
                        crate::executor::Classification::Failure(reason) => reason.clone(),
                        other => format!("{other:?}"),
                    };
                    (false, result.output_tail, Some(message))
                }
                Err(e) => (false, String::new(), Some(e.to_string())),
            };

            if succeeded {
                self.store.mark_completed(&task.id).await?;
                self.registry.on_task_complete(&context, &output_tail).await?;
                self.retry_counter.clear();
                self.circuit_breaker.record_success();
                self.stats.tasks_completed += 1;
                self.pending_retry_context = None;
                iteration += 1;
                tokio::time::sleep(Duration::from_millis(self.config.task_delay_ms)).await;
                continue;
            }

            let error_message = error_message.unwrap_or_else(|| "unknown executor failure".to_string());
            // Per-task retry counter is checked *before* incrementing: the
            // value reflects how many retries have already happened for
            // this task, so `maxRetries = 1` fails on the very first
            // non-zero exit with no retry ever attempted.
            let attempts_so_far = self.retry_counter.attempts_for(&task.id);
            if attempts_so_far < self.config.max_retries.saturating_sub(1) {
                self.retry_counter.record_attempt(&task.id);
                self.store.reset_to_pending(&task.id).await?;
                let tail_start = output_tail.len().saturating_sub(RETRY_CONTEXT_TAIL_BYTES);
                self.pending_retry_context =
                    Some(RetryContext { attempt: attempts_so_far + 1, previous_output_tail: output_tail[tail_start..].to_string() });
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                iteration += 1;
                continue;
            }

            self.store.mark_failed(&task.id, &error_message).await?;
            self.registry.on_task_failed(&context, &error_message).await?;
            self.retry_counter.clear();
            self.circuit_breaker.record_failure();
            self.stats.tasks_failed += 1;
            self.pending_retry_context = None;
            iteration += 1;
            self.stats.iterations_run = iteration;
            tokio::time::sleep(Duration::from_millis(self.config.task_delay_ms)).await;
        };

        self.stats.iterations_run = iteration;
        self.registry.on_loop_end(&self.stats).await?;

        if stop_reason == StopReason::BacklogEmpty {
            self.state_store.clear_state()?;
        }

        Ok(stop_reason)
    }

    /// Capture the in-flight task/iteration, terminate the current
    /// subprocess, and save resume state — the cancellation path (§4.7.2)
    /// invoked from a signal handler.
    pub async fn cancel(&mut self) -> Result<(), SchedulerError> {
        self.executor.kill_current().await;
        self.state_store.release_lock();
        Ok(())
    }

    /// A cloneable handle that can terminate this scheduler's in-flight
    /// subprocess without requiring exclusive access to the scheduler
    /// itself — obtained once, before `run` takes `&mut self` for the
    /// duration of the loop, and handed to a concurrent signal handler.
    pub fn kill_switch(&self) -> crate::executor::KillSwitch {
        self.executor.kill_switch()
    }
}
