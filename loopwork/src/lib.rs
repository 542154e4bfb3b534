//! Library surface for the loopwork orchestrator: wires the config loader,
//! rotator/executor, plugin registry, scheduler/loop, and process supervisor
//! into types `main` and `cli` can drive.

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod plugins;
pub mod prompt;
pub mod rotator;
pub mod scheduler;
pub mod supervisor;

pub use config::Config;
pub use error::{ExecutorError, LoopworkError, PluginError, SchedulerError, SupervisorError};
pub use executor::Executor;
pub use plugins::Registry;
pub use scheduler::{Scheduler, StopReason};
pub use supervisor::Supervisor;
