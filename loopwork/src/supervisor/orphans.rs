//! Orphan detection: processes whose working directory matches the project
//! root but aren't tracked by any namespace's pid file. Linux-only (reads
//! `/proc/<pid>/cwd` and `/proc/<pid>/cmdline`); other platforms report an
//! empty scan rather than guessing from a less reliable source.

use std::path::{Path, PathBuf};

/// Confidence that a discovered process is actually an orphaned loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Its argv names the loopwork binary and a `run-daemon` subcommand.
    Confirmed,
    /// Its cwd matches the project root but argv doesn't clearly identify it.
    Suspected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanProcess {
    pub pid: u32,
    pub cwd: PathBuf,
    pub cmdline: String,
    pub confidence: Confidence,
}

/// How `kill_orphans` applies its termination signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillMode {
    /// Report what would be signalled without sending anything.
    DryRun,
    /// SIGTERM.
    Normal,
    /// SIGKILL.
    Forced,
}

/// Scan the process table for processes whose cwd matches `project_root`.
#[cfg(target_os = "linux")]
pub fn scan(project_root: &Path) -> Vec<OrphanProcess> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return found;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let cwd_link = entry.path().join("cwd");
        let Ok(cwd) = std::fs::read_link(&cwd_link) else {
            continue;
        };
        if cwd != project_root {
            continue;
        }

        let cmdline = std::fs::read(entry.path().join("cmdline"))
            .map(|bytes| bytes.split(|&b| b == 0).filter(|s| !s.is_empty()).map(|s| String::from_utf8_lossy(s).to_string()).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        let confidence =
            if cmdline.contains("loopwork") && cmdline.contains("run-daemon") { Confidence::Confirmed } else { Confidence::Suspected };

        found.push(OrphanProcess { pid, cwd, cmdline, confidence });
    }

    found
}

#[cfg(not(target_os = "linux"))]
pub fn scan(_project_root: &Path) -> Vec<OrphanProcess> {
    Vec::new()
}

/// Apply `mode` to every process in `orphans`, returning the pids actually
/// signalled (empty in `DryRun` mode).
pub fn kill_orphans(orphans: &[OrphanProcess], mode: KillMode) -> Vec<u32> {
    if mode == KillMode::DryRun {
        return Vec::new();
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        let signal = if mode == KillMode::Forced { Signal::SIGKILL } else { Signal::SIGTERM };
        orphans
            .iter()
            .filter_map(|o| kill(Pid::from_raw(o.pid as i32), signal).ok().map(|()| o.pid))
            .collect()
    }

    #[cfg(not(unix))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dry_run_never_signals_anything() {
        let orphans = vec![OrphanProcess { pid: 999_999, cwd: PathBuf::from("/tmp"), cmdline: String::new(), confidence: Confidence::Suspected }];
        assert!(kill_orphans(&orphans, KillMode::DryRun).is_empty());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn scan_finds_no_matches_for_an_unused_directory() {
        let dir = tempfile::tempdir().unwrap();
        let found = scan(dir.path());
        assert!(found.is_empty());
    }
}
