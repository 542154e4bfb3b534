//! `loopwork` — backlog orchestrator CLI entry point. Parses arguments,
//! loads configuration, wires the Task Store, Rotator, Executor, Plugin
//! Registry, and Scheduler together, and dispatches to the Supervisor for
//! the `start`/`stop`/`restart`/`status` surface. Mirrors the teacher's own
//! `main.rs` dispatch-by-subcommand shape.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use loopwork::cli::{Cli, Command, NOT_IMPLEMENTED};
use loopwork::config::Config;
use loopwork::executor::Executor;
use loopwork::plugins::{BackendReadinessPlugin, LoggingPlugin, Registry};
use loopwork::rotator::{ModelSlot, Rotator};
use loopwork::scheduler::{Scheduler, StopReason};
use loopwork::supervisor::Supervisor;
use taskstore::{JsonTaskAdapter, Store, StateStore};

fn setup_logging(verbose: bool, json_logs: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// The rotator's default primary/fallback pools. Not yet a config knob
/// (§6.3 doesn't name one); grounded in the teacher's own pricing table
/// (`llm/types.rs`), which already distinguishes sonnet/opus/gpt-5 tiers.
fn default_rotator() -> Rotator {
    Rotator::new(
        vec![ModelSlot::new("claude-sonnet", "claude", "claude-sonnet-4"), ModelSlot::new("claude-opus", "claude", "claude-opus-4")],
        vec![ModelSlot::new("codex-fallback", "codex", "gpt-5")],
    )
}

fn store_path(config: &Config) -> PathBuf {
    config.project_root.join("tasks.json")
}

/// Build the store, state store, executor, and plugin registry a loop
/// needs, applying `onConfigLoad` and degraded-mode gating before anything
/// else runs.
async fn build_scheduler(mut config: Config) -> Result<(Scheduler, Config)> {
    let mut registry = Registry::new();
    registry.register(Arc::new(BackendReadinessPlugin));
    registry.register(Arc::new(LoggingPlugin));

    config = registry.apply_config_hooks(config).await.context("plugin onConfigLoad hooks failed")?;
    registry.apply_flags(&config);

    let store: Arc<dyn Store> = Arc::new(JsonTaskAdapter::new(store_path(&config)));
    registry.on_backend_ready(store.as_ref()).await.context("critical plugin rejected the backend on startup")?;

    let executor = Executor::new(default_rotator()).context("no AI CLI tool found on PATH or in well-known install directories")?;
    let state_store = StateStore::new(&config.project_root, config.namespace.as_str());

    let scheduler = Scheduler::new(config.clone(), store, state_store, executor, registry);
    Ok((scheduler, config))
}

/// Run the loop to completion (or until cancelled), honoring Ctrl+C /
/// SIGTERM as the cancellation path in §4.7.2. The kill switch is obtained
/// before `run` takes `&mut scheduler` for the duration of the loop, so the
/// signal branch can terminate the in-flight subprocess without aliasing
/// that borrow; resume state is already current (saved every iteration)
/// and the namespace lock is released when the process exits regardless.
async fn run_to_completion(mut scheduler: Scheduler, task: Option<String>) -> Result<i32> {
    let kill_switch = scheduler.kill_switch();
    let run = scheduler.run(task);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = run => finish(result),
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, terminating in-flight subprocess");
                kill_switch.kill().await;
                Ok(130)
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received, terminating in-flight subprocess");
                kill_switch.kill().await;
                Ok(130)
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = run => finish(result),
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupt received, terminating in-flight subprocess");
                kill_switch.kill().await;
                Ok(130)
            }
        }
    }
}

/// Fan out `n` independent loops, one per derived namespace
/// (`<namespace>-0` .. `<namespace>-{n-1}`), each with its own `Scheduler`
/// and state/lock files. Each loop keeps the single-threaded cooperative
/// invariant of §4.7 within itself; only the fan-out is concurrent. Exits
/// with the first non-zero exit code encountered, if any.
async fn run_parallel(config: Config, namespace: String, n: u32) -> Result<i32> {
    info!(count = n, "fanning out parallel loops");
    let mut handles = Vec::with_capacity(n as usize);

    for i in 0..n {
        let mut sub_config = config.clone();
        sub_config.namespace = format!("{namespace}-{i}");
        handles.push(tokio::spawn(async move {
            let (scheduler, _) = build_scheduler(sub_config).await?;
            run_to_completion(scheduler, None).await
        }));
    }

    let mut exit_code = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(code)) if code != 0 && exit_code == 0 => exit_code = code,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(join_err) => return Err(eyre::eyre!(join_err)).context("parallel loop task panicked"),
        }
    }
    Ok(exit_code)
}

fn finish(result: std::result::Result<StopReason, loopwork::SchedulerError>) -> Result<i32> {
    match result {
        Ok(StopReason::BacklogEmpty) => {
            info!("backlog empty, loop finished");
            Ok(0)
        }
        Ok(StopReason::IterationCapReached) => {
            info!("iteration cap reached, loop finished");
            Ok(0)
        }
        Ok(StopReason::CircuitOpen) => {
            warn!("circuit breaker open, aborting run");
            Ok(2)
        }
        Ok(StopReason::Interrupted) => Ok(130),
        Err(loopwork::SchedulerError::State(taskstore::StateError::LockTimeout(_))) => Ok(3),
        Err(e) => Err(eyre::eyre!(e)).context("loop terminated with an error"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.json_logs);

    let exit_code = dispatch(cli).await?;
    std::process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let mut config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;

    let Some(command) = cli.command else {
        println!("{}", NOT_IMPLEMENTED);
        return Ok(0);
    };

    match command {
        Command::Run { namespace, task, max_iterations, dry_run, parallel } => {
            if let Some(n) = max_iterations {
                config.max_iterations = n;
            }
            config.dry_run = config.dry_run || dry_run;

            match parallel {
                Some(n) if n > 1 => run_parallel(config, namespace, n).await,
                _ => {
                    config.namespace = namespace;
                    let (scheduler, _) = build_scheduler(config).await?;
                    run_to_completion(scheduler, task).await
                }
            }
        }

        Command::RunDaemon { namespace, task, max_iterations, dry_run } => {
            config.namespace = namespace.clone();
            if let Some(n) = max_iterations {
                config.max_iterations = n;
            }
            config.dry_run = config.dry_run || dry_run;
            let supervisor = Supervisor::new(config.loopwork_dir(), namespace.as_str());
            supervisor.register_self().context("failed to record this process's pid")?;
            let (scheduler, _) = build_scheduler(config).await?;
            run_to_completion(scheduler, task).await
        }

        Command::Start { namespace, foreground } => {
            config.namespace = namespace.clone();
            if foreground {
                let (scheduler, _) = build_scheduler(config).await?;
                return run_to_completion(scheduler, None).await;
            }
            let supervisor = Supervisor::new(config.loopwork_dir(), namespace.as_str());
            let mut args = Vec::new();
            if config.dry_run {
                args.push("--dry-run".to_string());
            }
            let pid = supervisor.start(&args).context("failed to start daemon")?;
            println!("started namespace '{namespace}' (pid {pid})");
            Ok(0)
        }

        Command::Stop { namespace, force } => {
            let supervisor = Supervisor::new(config.loopwork_dir(), namespace.as_str());
            supervisor.stop(force).context("failed to stop daemon")?;
            println!("stopped namespace '{namespace}'");
            Ok(0)
        }

        Command::Restart { namespace } => {
            let supervisor = Supervisor::new(config.loopwork_dir(), namespace.as_str());
            let pid = supervisor.restart().context("failed to restart daemon")?;
            println!("restarted namespace '{namespace}' (pid {pid})");
            Ok(0)
        }

        Command::Status { namespace } => {
            let supervisor = Supervisor::new(config.loopwork_dir(), namespace.as_str());
            let status = supervisor.status();
            if status.running {
                println!("namespace '{namespace}' is running (pid {})", status.pid.unwrap_or_default());
            } else {
                println!("namespace '{namespace}' is not running");
            }
            Ok(0)
        }

        Command::Logs { .. } | Command::Ps | Command::Processes | Command::Deadletter { .. } | Command::Reschedule { .. } | Command::Dashboard => {
            debug!("stub subcommand invoked");
            println!("{}", NOT_IMPLEMENTED);
            Ok(0)
        }
    }
}
