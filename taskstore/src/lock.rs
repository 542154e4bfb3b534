//! Advisory file locking with crash recovery.
//!
//! The store serializes writers through a `{store}.lock` sidecar: an
//! `flock`'d file that also carries the holder's PID and an mtime. A lock
//! file whose PID is no longer alive is treated as abandoned and reclaimed
//! rather than waited out forever, the same way `DaemonManager` treats a
//! stale PID file as evidence of a crashed process rather than a live one.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
#[cfg(unix)]
use nix::sys::signal::kill;
#[cfg(unix)]
use nix::unistd::Pid;

use crate::error::StoreError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_BUDGET: Duration = Duration::from_secs(5);
const STALE_AGE: Duration = Duration::from_secs(30);

fn is_stale(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AGE)
}

/// Whether `pid` refers to a process that is still alive. On Unix this sends
/// signal 0, which delivers no signal but still reports ESRCH for a dead pid.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

fn read_lock_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// An RAII guard over an acquired store lock. Releasing the OS-level flock
/// and removing the sidecar file happen in `Drop`, so every exit path -
/// including an early `?` return or a panic unwind - releases the lock.
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl LockGuard {
    /// Block (polling every 100ms) until the lock at `path` is acquired or
    /// `budget` elapses. A lock file holding a dead PID is reclaimed
    /// immediately rather than waited out.
    pub fn acquire(path: impl Into<PathBuf>, budget: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        let deadline = Instant::now() + budget;

        loop {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }

            let file = OpenOptions::new().create(true).write(true).truncate(false).open(&path).map_err(|e| {
                StoreError::StoreWriteFailed(format!("opening lock file {}: {e}", path.display()))
            })?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    file.set_len(0).ok();
                    let mut f = &file;
                    let _ = write!(f, "{}", std::process::id());
                    let _ = f.flush();
                    return Ok(Self { path, file: Some(file) });
                }
                Err(_) => {
                    let holder_dead = read_lock_pid(&path).is_some_and(|pid| !is_process_alive(pid));
                    if holder_dead || is_stale(&path) {
                        tracing::warn!(path = %path.display(), holder_dead, "reclaiming abandoned store lock");
                        let _ = std::fs::remove_file(&path);
                        continue;
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(budget));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Acquire using the library's default 5 second budget.
    pub fn acquire_default(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::acquire(path, DEFAULT_BUDGET)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        let _ = std::fs::remove_file(&self.path);
    }
}
