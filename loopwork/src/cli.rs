//! CLI command definitions and subcommands. Generalizes the teacher's
//! `Cli`/`Command` (`src/cli.rs`) from a single global daemon into a
//! namespaced loop orchestrator, with thin stubs for the auxiliary
//! commands this core deliberately doesn't implement.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "loopwork",
    about = "Backlog orchestrator that drives an external AI CLI tool over a task store",
    version = env!("GIT_DESCRIBE")
)]
pub struct Cli {
    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit structured JSON log lines instead of plain text.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the loop in the foreground against `namespace`'s backlog.
    Run {
        /// Namespace key for state, runs, and supervisor registry.
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Task id to dispatch first, instead of `findNextTask`.
        #[arg(long)]
        task: Option<String>,

        /// Hard cap on iterations.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Skip execution; log what would run.
        #[arg(long)]
        dry_run: bool,

        /// Run this many independent loops concurrently, one per derived
        /// namespace (`<namespace>-0`, `<namespace>-1`, ...), instead of the
        /// single cooperative loop this core runs by default.
        #[arg(long)]
        parallel: Option<u32>,
    },

    /// Start a namespace's loop as a detached background process.
    Start {
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Don't detach; run in the foreground (equivalent to `run`).
        #[arg(long)]
        foreground: bool,
    },

    /// Stop a namespace's running loop.
    Stop {
        #[arg(long, default_value = "default")]
        namespace: String,

        /// Send SIGKILL immediately instead of SIGTERM.
        #[arg(long)]
        force: bool,
    },

    /// Stop then restart a namespace's loop with its saved arguments.
    Restart {
        #[arg(long, default_value = "default")]
        namespace: String,
    },

    /// Show whether a namespace's loop is running.
    Status {
        #[arg(long, default_value = "default")]
        namespace: String,
    },

    /// Internal: re-exec target used by `start`/`restart`.
    #[command(hide = true)]
    RunDaemon {
        namespace: String,

        #[arg(long)]
        task: Option<String>,

        #[arg(long)]
        max_iterations: Option<u32>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Not implemented in this core: tail the session log.
    Logs { namespace: Option<String> },

    /// Not implemented in this core: list supervised processes.
    Ps,

    /// Not implemented in this core: alias for `ps`.
    Processes,

    /// Not implemented in this core: inspect quarantined tasks.
    Deadletter { namespace: Option<String> },

    /// Not implemented in this core: bulk-reschedule completed tasks.
    Reschedule { namespace: Option<String> },

    /// Not implemented in this core: launch the TUI dashboard.
    Dashboard,
}

/// The fixed response for every stub subcommand.
pub const NOT_IMPLEMENTED: &str = "not implemented in this core";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_namespace() {
        let cli = Cli::parse_from(["loopwork", "run", "--namespace", "ci"]);
        match cli.command {
            Some(Command::Run { namespace, .. }) => assert_eq!(namespace, "ci"),
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn parses_run_with_parallel() {
        let cli = Cli::parse_from(["loopwork", "run", "--parallel", "3"]);
        match cli.command {
            Some(Command::Run { parallel, .. }) => assert_eq!(parallel, Some(3)),
            _ => panic!("expected Run"),
        }
    }

    #[test]
    fn defaults_namespace_to_default() {
        let cli = Cli::parse_from(["loopwork", "status"]);
        match cli.command {
            Some(Command::Status { namespace }) => assert_eq!(namespace, "default"),
            _ => panic!("expected Status"),
        }
    }

    #[test]
    fn stop_force_flag_parses() {
        let cli = Cli::parse_from(["loopwork", "stop", "--force"]);
        match cli.command {
            Some(Command::Stop { force, .. }) => assert!(force),
            _ => panic!("expected Stop"),
        }
    }

    #[test]
    fn run_daemon_is_hidden_but_still_parses() {
        let cli = Cli::parse_from(["loopwork", "run-daemon", "default"]);
        assert!(matches!(cli.command, Some(Command::RunDaemon { .. })));
    }

    #[test]
    fn no_command_is_allowed() {
        let cli = Cli::parse_from(["loopwork"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn stub_subcommands_parse() {
        assert!(matches!(Cli::parse_from(["loopwork", "ps"]).command, Some(Command::Ps)));
        assert!(matches!(Cli::parse_from(["loopwork", "dashboard"]).command, Some(Command::Dashboard)));
    }
}
