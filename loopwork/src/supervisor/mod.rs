//! Process Supervisor (§4.9): start/stop/restart a namespaced, detached
//! Scheduler process, PID + saved-argv bookkeeping, and orphan detection.
//! Generalizes the teacher's `DaemonManager` (`src/daemon.rs`) from a
//! single global daemon to one instance per namespace.

pub mod orphans;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SupervisorError;

/// How long `restart` waits for the old process to exit before giving up.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STOP_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Saved argument vector, persisted so `restart` can relaunch with the same
/// invocation that started the namespace originally.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RestartArgs {
    args: Vec<String>,
}

/// Current status of a namespace's supervised process.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

/// Supervises one namespace's detached Scheduler process.
pub struct Supervisor {
    namespace: String,
    pid_file: PathBuf,
    restart_args_file: PathBuf,
}

impl Supervisor {
    pub fn new(loopwork_dir: impl AsRef<Path>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let loopwork_dir = loopwork_dir.as_ref();
        Self {
            pid_file: loopwork_dir.join(format!("{namespace}.pid")),
            restart_args_file: loopwork_dir.join(format!("{namespace}-restart-args.json")),
            namespace,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn read_pid(&self) -> Option<u32> {
        let contents = fs::read_to_string(&self.pid_file).ok()?;
        contents.trim().parse().ok()
    }

    fn write_pid(&self, pid: u32) -> Result<(), SupervisorError> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&self.pid_file)?;
        write!(file, "{pid}")?;
        Ok(())
    }

    fn remove_pid_file(&self) -> Result<(), SupervisorError> {
        match fs::remove_file(&self.pid_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_restart_args(&self, args: &[String]) -> Result<(), SupervisorError> {
        if let Some(parent) = self.restart_args_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(&RestartArgs { args: args.to_vec() })
            .map_err(|e| SupervisorError::ProcessSpawnFailed(format!("failed to serialize restart args: {e}")))?;
        fs::write(&self.restart_args_file, serialized)?;
        Ok(())
    }

    fn load_restart_args(&self) -> Result<Vec<String>, SupervisorError> {
        let mut file = fs::File::open(&self.restart_args_file)
            .map_err(|_| SupervisorError::NotRunning(self.namespace.clone()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let parsed: RestartArgs = serde_json::from_str(&contents)
            .map_err(|e| SupervisorError::ProcessSpawnFailed(format!("corrupt restart-args file: {e}")))?;
        Ok(parsed.args)
    }

    pub fn is_running(&self) -> bool {
        self.read_pid().is_some_and(is_process_running)
    }

    pub fn status(&self) -> SupervisorStatus {
        let pid = self.read_pid().filter(|&pid| is_process_running(pid));
        SupervisorStatus { running: pid.is_some(), pid, pid_file: self.pid_file.clone() }
    }

    /// Spawn a detached child re-invoking the current executable with
    /// `run-daemon <namespace> <args...>`, recording its pid and persisting
    /// `args` for a later `restart`. Refuses if a live process is already
    /// registered for this namespace.
    pub fn start(&self, args: &[String]) -> Result<u32, SupervisorError> {
        if self.is_running() {
            return Err(SupervisorError::AlreadyRunning(self.namespace.clone()));
        }

        let exe = std::env::current_exe().map_err(SupervisorError::Io)?;
        debug!(?exe, namespace = %self.namespace, "supervisor: spawning detached process");

        let child = Command::new(&exe)
            .arg("run-daemon")
            .arg(&self.namespace)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SupervisorError::ProcessSpawnFailed(e.to_string()))?;

        let pid = child.id();
        self.write_pid(pid)?;
        self.save_restart_args(args)?;
        info!(pid, namespace = %self.namespace, "supervisor: started");
        Ok(pid)
    }

    /// Politely terminate (SIGTERM); escalate to SIGKILL if `force`.
    pub fn stop(&self, force: bool) -> Result<(), SupervisorError> {
        let pid = self.read_pid().filter(|&pid| is_process_running(pid)).ok_or_else(|| SupervisorError::NotRunning(self.namespace.clone()))?;
        send_signal(pid, force);
        self.remove_pid_file()?;
        Ok(())
    }

    /// Stop with a bounded poll-wait for the process to actually exit
    /// (100ms interval, 10s timeout), then start with the saved argv.
    pub fn restart(&self) -> Result<u32, SupervisorError> {
        let saved_args = self.load_restart_args()?;

        if let Some(pid) = self.read_pid().filter(|&pid| is_process_running(pid)) {
            send_signal(pid, false);

            let deadline = std::time::Instant::now() + STOP_POLL_TIMEOUT;
            while is_process_running(pid) {
                if std::time::Instant::now() >= deadline {
                    return Err(SupervisorError::StopTimeout(self.namespace.clone()));
                }
                std::thread::sleep(STOP_POLL_INTERVAL);
            }
            self.remove_pid_file()?;
        }

        self.start(&saved_args)
    }

    /// Called by the re-exec'd `run-daemon` process itself once it has
    /// taken over the Scheduler loop, so the pid file reflects the actual
    /// running process rather than an intermediate fork.
    pub fn register_self(&self) -> Result<(), SupervisorError> {
        self.write_pid(std::process::id())
    }
}

fn send_signal(pid: u32, force: bool) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if kill(Pid::from_raw(pid as i32), signal).is_err() {
            warn!(pid, "supervisor: failed to signal process, it may have already exited");
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, force);
    }
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_refuses_when_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(dir.path(), "default");
        supervisor.write_pid(std::process::id()).unwrap();

        let result = supervisor.start(&[]);
        assert!(matches!(result, Err(SupervisorError::AlreadyRunning(_))));
    }

    #[test]
    fn stop_reports_not_running_without_a_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(dir.path(), "default");
        assert!(matches!(supervisor.stop(false), Err(SupervisorError::NotRunning(_))));
    }

    #[test]
    fn restart_without_prior_start_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(dir.path(), "default");
        assert!(matches!(supervisor.restart(), Err(SupervisorError::NotRunning(_))));
    }

    #[test]
    fn status_reflects_pid_file_presence() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(dir.path(), "default");
        assert!(!supervisor.status().running);

        supervisor.write_pid(std::process::id()).unwrap();
        assert!(supervisor.status().running);
        assert_eq!(supervisor.status().pid, Some(std::process::id()));
    }

    #[test]
    fn register_self_writes_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(dir.path(), "default");
        supervisor.register_self().unwrap();
        assert_eq!(supervisor.read_pid(), Some(std::process::id()));
    }
}
