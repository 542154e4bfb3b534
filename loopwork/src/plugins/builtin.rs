//! Built-in plugins: a critical backend-readiness check (wrapping
//! `Store::ping`) and an enhancement-classed structured logger, the two
//! plugins a loop always has registered regardless of what an embedder
//! adds on top.

use async_trait::async_trait;
use taskstore::Store;
use tracing::info;

use super::{Classification, LoopStats, Plugin, PluginMeta, TaskContext};

/// Registered as a `critical` plugin: its `onBackendReady` hook calls
/// `Store::ping` so a dead backend aborts startup instead of failing on
/// the first task dispatch.
pub struct BackendReadinessPlugin;

#[async_trait]
impl Plugin for BackendReadinessPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta { name: "backend-readiness".to_string(), classification: Classification::Critical, requires_network: false }
    }

    async fn on_backend_ready(&self, store: &dyn Store) -> eyre::Result<()> {
        let result = store.ping().await.map_err(|e| eyre::eyre!(e))?;
        if !result.ok {
            return Err(eyre::eyre!("store reported unhealthy on ping"));
        }
        info!(latency_ms = result.latency_ms, "backend ping succeeded");
        Ok(())
    }
}

/// An `enhancement` plugin that emits a structured `tracing` line at each
/// lifecycle point. Safe to auto-disable; the loop keeps running without it.
pub struct LoggingPlugin;

#[async_trait]
impl Plugin for LoggingPlugin {
    fn meta(&self) -> PluginMeta {
        PluginMeta { name: "logging".to_string(), classification: Classification::Enhancement, requires_network: false }
    }

    async fn on_loop_start(&self, namespace: &str) -> eyre::Result<()> {
        info!(namespace, "loop started");
        Ok(())
    }

    async fn on_task_start(&self, context: &TaskContext) -> eyre::Result<()> {
        info!(task_id = %context.task_id, iteration = context.iteration, "task started");
        Ok(())
    }

    async fn on_task_complete(&self, context: &TaskContext, _output_tail: &str) -> eyre::Result<()> {
        info!(task_id = %context.task_id, iteration = context.iteration, "task completed");
        Ok(())
    }

    async fn on_task_failed(&self, context: &TaskContext, error: &str) -> eyre::Result<()> {
        info!(task_id = %context.task_id, iteration = context.iteration, error, "task failed");
        Ok(())
    }

    async fn on_loop_end(&self, stats: &LoopStats) -> eyre::Result<()> {
        info!(completed = stats.tasks_completed, failed = stats.tasks_failed, iterations = stats.iterations_run, "loop ended");
        Ok(())
    }
}
