//! Retry & circuit-breaker counters (§4.7 step 1, step 9): a per-task
//! attempt counter that resets whenever a new task is dispatched, and a
//! loop-wide consecutive-failure counter that trips the circuit breaker.

/// Tracks attempts against the single task currently in flight. Reset
/// whenever the scheduler moves on to a different task.
#[derive(Debug, Default)]
pub struct RetryCounter {
    task_id: Option<String>,
    attempts: u32,
}

impl RetryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt count recorded so far for `task_id`, starting a fresh count
    /// if this is a different task than last time.
    pub fn attempts_for(&mut self, task_id: &str) -> u32 {
        if self.task_id.as_deref() != Some(task_id) {
            self.task_id = Some(task_id.to_string());
            self.attempts = 0;
        }
        self.attempts
    }

    /// Record one more attempt against `task_id`.
    pub fn record_attempt(&mut self, task_id: &str) {
        self.attempts_for(task_id);
        self.attempts += 1;
    }

    /// Clear the counter, called once a task reaches a terminal outcome
    /// (completed or exhausted its retries into `failed`).
    pub fn clear(&mut self) {
        self.task_id = None;
        self.attempts = 0;
    }
}

/// Trips after `threshold` consecutive task failures, aborting the loop.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self { threshold, consecutive_failures: 0 }
    }

    pub fn is_open(&self) -> bool {
        self.consecutive_failures >= self.threshold
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
    }
}
