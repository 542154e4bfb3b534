//! CLI Executor (§4.5): discovers an installed AI CLI tool, spawns it as a
//! subprocess against a prompt, tees combined output to a session log file
//! and to this process's own stdout, enforces a timeout with a
//! SIGTERM-then-SIGKILL escalation, and classifies the result. Generalizes
//! the teacher's `tokio::process::Command` + `tokio::time::timeout` idiom
//! from `tools/builtin/run_command.rs`.

mod classify;
mod discover;
mod tool;

pub use classify::Classification;
pub use discover::discover_tools;
pub use tool::ToolVariant;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::rotator::Rotator;

/// Grace period between SIGTERM and SIGKILL when a subprocess overruns its
/// timeout or is cancelled.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Send SIGTERM to `pid`, waiting up to `KILL_GRACE` for it to disappear
/// before escalating to SIGKILL. Used both by the per-run timeout path and
/// by `Executor::kill_current`, so a concurrent caller and an internal
/// timeout race harmlessly onto the same signal sequence.
#[cfg(unix)]
async fn signal_terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    tokio::time::sleep(KILL_GRACE).await;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
async fn signal_terminate(_pid: u32) {}

/// Result of one executor invocation.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub classification: Classification,
    /// Tail of the combined output, used for `lastError`/retry context.
    pub output_tail: String,
}

/// A cheap, `Clone`-able handle that can terminate whatever subprocess an
/// `Executor` currently has in flight, without requiring exclusive access
/// to the `Executor` itself. Lets a signal handler running concurrently
/// with the scheduler's loop reach in and kill the child process without
/// aliasing the scheduler's own `&mut self` borrow.
#[derive(Clone)]
pub struct KillSwitch {
    current_pid: Arc<Mutex<Option<u32>>>,
}

impl KillSwitch {
    /// See `Executor::kill_current`: same invariants (idempotent, safe when
    /// nothing is running, safe under concurrent callers).
    pub async fn kill(&self) {
        let pid = *self.current_pid.lock().await;
        if let Some(pid) = pid {
            signal_terminate(pid).await;
        }
    }
}

/// Converts `(prompt, outputFile, timeout)` requests into subprocess runs,
/// rotating through the Model Rotator's viable `(tool, model)` pairs.
pub struct Executor {
    rotator: Rotator,
    tool_paths: HashMap<String, PathBuf>,
    /// PID of the currently in-flight subprocess, if any. `kill_current`
    /// signals through the PID rather than holding the `Child` handle, so
    /// it never contends with the run loop's own `wait()`.
    current_pid: Arc<Mutex<Option<u32>>>,
    /// Backoff applied on a detected rate-limit marker. Defaults to
    /// `classify::RATE_LIMIT_SLEEP`; overridable so tests don't block for
    /// real wall-clock seconds.
    rate_limit_sleep: Duration,
}

impl Executor {
    /// Discover installed tools. Fails with `NoCLIFound` if none of the
    /// known tool variants resolve to an installed binary.
    pub fn new(rotator: Rotator) -> Result<Self, ExecutorError> {
        let tool_paths: HashMap<String, PathBuf> = discover_tools().into_iter().collect();
        if tool_paths.is_empty() {
            return Err(ExecutorError::NoCLIFound);
        }
        Ok(Self { rotator, tool_paths, current_pid: Arc::new(Mutex::new(None)), rate_limit_sleep: classify::RATE_LIMIT_SLEEP })
    }

    /// Construct with a caller-supplied tool-path map, bypassing live PATH
    /// discovery — used by tests that point a rotator slot at a scripted
    /// fake CLI.
    pub fn with_tool_paths(rotator: Rotator, tool_paths: HashMap<String, PathBuf>) -> Result<Self, ExecutorError> {
        if tool_paths.is_empty() {
            return Err(ExecutorError::NoCLIFound);
        }
        Ok(Self { rotator, tool_paths, current_pid: Arc::new(Mutex::new(None)), rate_limit_sleep: classify::RATE_LIMIT_SLEEP })
    }

    /// Override the rate-limit backoff. Test-only seam: production always
    /// runs with the real 30s default.
    #[cfg(test)]
    pub fn with_rate_limit_sleep(mut self, sleep: Duration) -> Self {
        self.rate_limit_sleep = sleep;
        self
    }

    pub fn reset_rotator_fallback(&mut self) {
        self.rotator.reset_fallback();
    }

    /// Obtain a `KillSwitch` for the subprocess this executor runs,
    /// cloneable so it can be handed to a signal handler before `run` is
    /// ever called.
    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch { current_pid: self.current_pid.clone() }
    }

    /// Run `prompt` to completion (including in-call fallback promotion),
    /// teeing combined output to `output_file`. Per §4.5: once the primary
    /// pool has been fully attempted without success and fallback has not
    /// yet engaged, the call switches to fallback and keeps going, up to a
    /// total of `primary.len() + fallback.len()` attempts.
    pub async fn run(&mut self, prompt: &str, output_file: &Path, timeout: Duration) -> Result<RunResult, ExecutorError> {
        let max_attempts = self.rotator.total_slots().max(1);
        let primary_len = self.rotator.primary_len();
        let mut primary_attempts = 0usize;

        for attempt in 0..max_attempts {
            let slot = self.rotator.next().ok_or(ExecutorError::NoCLIFound)?.clone();
            debug!(attempt, slot = %slot.name, "executor: dispatching attempt");
            if !self.rotator.is_using_fallback() {
                primary_attempts += 1;
            }

            let variant = ToolVariant::from_tool_name(&slot.tool);
            let result = self.spawn_and_wait(&variant, &slot.tool, &slot.model, prompt, output_file, timeout).await?;

            match &result.classification {
                Classification::RateLimited { .. } => {
                    warn!(sleep = ?self.rate_limit_sleep, "executor: rate limited, sleeping before retry");
                    tokio::time::sleep(self.rate_limit_sleep).await;
                    continue;
                }
                Classification::QuotaExhausted => {
                    info!("executor: quota exhausted, switching to fallback pool");
                    self.rotator.switch_to_fallback();
                    continue;
                }
                Classification::Success => return Ok(result),
                Classification::Failure(_) => {
                    let primary_just_exhausted = !self.rotator.is_using_fallback() && primary_attempts >= primary_len;
                    let more_attempts_remain = attempt + 1 < max_attempts;
                    if primary_just_exhausted && !self.rotator.is_using_fallback() && more_attempts_remain {
                        info!("executor: primary pool exhausted this call, engaging fallback");
                        self.rotator.switch_to_fallback();
                        continue;
                    }
                    return Ok(result);
                }
            }
        }

        Err(ExecutorError::SpawnFailed("exhausted all rotator slots without a classifiable result".into()))
    }

    /// Terminate the in-flight subprocess, if any. Safe to call concurrently
    /// and safe to call when nothing is running; idempotent under repeated
    /// calls (the invariant §4.5 requires of `killCurrent`).
    pub async fn kill_current(&self) {
        self.kill_switch().kill().await;
    }

    async fn spawn_and_wait(
        &self,
        variant: &ToolVariant,
        tool_name: &str,
        model: &str,
        prompt: &str,
        output_file: &Path,
        timeout: Duration,
    ) -> Result<RunResult, ExecutorError> {
        if let Some(parent) = output_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out_file = tokio::fs::File::create(output_file).await?;

        let binary = self.tool_paths.get(tool_name).ok_or(ExecutorError::NoCLIFound)?;
        let mut command = variant.build_command(binary, model, prompt);
        command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| ExecutorError::SpawnFailed(e.to_string()))?;
        *self.current_pid.lock().await = child.id();

        if let (ToolVariant::Codex, Some(mut stdin)) = (variant, child.stdin.take()) {
            let prompt = prompt.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let tail = Arc::new(Mutex::new(String::new()));
        let stdout_task = tee_stream(stdout, tail.clone());
        let stderr_task = tee_stream(stderr, tail.clone());

        let wait_result = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(timeout) => None,
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let combined_tail = tail.lock().await.clone();
        // persist the output to disk regardless of outcome
        out_file.write_all(combined_tail.as_bytes()).await.ok();

        let (exit_code, timed_out) = match wait_result {
            Some(Ok(status)) => (status.code(), false),
            Some(Err(e)) => return Err(ExecutorError::Io(e)),
            None => {
                warn!("executor: subprocess exceeded timeout, escalating termination");
                if let Some(pid) = child.id() {
                    signal_terminate(pid).await;
                }
                let _ = child.wait().await;
                (None, true)
            }
        };

        *self.current_pid.lock().await = None;

        let classification =
            if timed_out { Classification::Failure("timed out".into()) } else { classify::classify_output(&combined_tail, exit_code) };

        Ok(RunResult { exit_code, timed_out, classification, output_tail: combined_tail })
    }
}

/// Tail `stream` line by line into `sink`, bounded to the last 64 KiB, while
/// also echoing each line to this process's own stdout, same tee behavior
/// as the teacher's subprocess tools. The classifier inspects only the last
/// 2 KiB of this buffer (`classify::CLASSIFY_WINDOW`); the 64 KiB bound here
/// just keeps the captured tail from growing unbounded for a long-running
/// subprocess.
fn tee_stream<R: tokio::io::AsyncRead + Unpin + Send + 'static>(stream: R, sink: Arc<Mutex<String>>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            println!("{line}");
            let mut buf = sink.lock().await;
            buf.push_str(&line);
            buf.push('\n');
            const MAX_TAIL: usize = 64 * 1024;
            if buf.len() > MAX_TAIL {
                let excess = buf.len() - MAX_TAIL;
                buf.drain(..excess);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotator::ModelSlot;

    fn test_rotator() -> Rotator {
        Rotator::new(vec![ModelSlot::new("primary", "claude", "sonnet")], vec![ModelSlot::new("fallback", "codex", "gpt")])
    }

    // End-to-end runs against a scripted fake CLI live in
    // loopwork/tests/integration_test.rs; this module only covers the parts
    // that don't need a subprocess.

    #[tokio::test]
    async fn kill_current_is_a_noop_when_nothing_running() {
        let executor = Executor {
            rotator: test_rotator(),
            tool_paths: HashMap::new(),
            current_pid: Arc::new(Mutex::new(None)),
            rate_limit_sleep: classify::RATE_LIMIT_SLEEP,
        };
        executor.kill_current().await;
    }

    #[test]
    fn with_tool_paths_rejects_empty_map() {
        assert!(Executor::with_tool_paths(test_rotator(), HashMap::new()).is_err());
    }

    #[test]
    fn with_tool_paths_accepts_injected_fake_binary() {
        let mut paths = HashMap::new();
        paths.insert("claude".to_string(), PathBuf::from("/tmp/fake-claude"));
        assert!(Executor::with_tool_paths(test_rotator(), paths).is_ok());
    }

    #[tokio::test]
    async fn rate_limited_response_retries_the_next_slot_and_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("claude");
        let counter_path = dir.path().join("count");
        std::fs::write(&counter_path, "0").unwrap();
        std::fs::write(
            &script_path,
            format!(
                "#!/bin/sh\ncount=$(cat {counter})\ncount=$((count + 1))\necho $count > {counter}\nif [ \"$count\" -eq 1 ]; then\n  echo 'HTTP 429 Too Many Requests'\n  exit 1\nfi\nexit 0\n",
                counter = counter_path.display()
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms).unwrap();
        }

        let rotator = Rotator::new(
            vec![ModelSlot::new("primary-a", "claude", "sonnet"), ModelSlot::new("primary-b", "claude", "opus")],
            vec![],
        );
        let mut tool_paths = HashMap::new();
        tool_paths.insert("claude".to_string(), script_path);
        let mut executor =
            Executor::with_tool_paths(rotator, tool_paths).unwrap().with_rate_limit_sleep(Duration::from_millis(5));

        let output_file = dir.path().join("output.txt");
        let result = executor.run("prompt", &output_file, Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.classification, Classification::Success);
        assert_eq!(std::fs::read_to_string(&counter_path).unwrap().trim(), "2");
    }
}
