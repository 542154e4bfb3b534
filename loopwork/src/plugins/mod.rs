//! Plugin Registry and Bus (§4.8): a process-wide, explicitly-threaded
//! registry of lifecycle callbacks, dispatched serially in registration
//! order. Generalizes the teacher's `Tool` trait (`src/tools/traits.rs`)
//! from a single per-call interface into a set of named lifecycle hooks.

mod builtin;
mod context;

pub use builtin::{BackendReadinessPlugin, LoggingPlugin};
pub use context::TaskContext;

use async_trait::async_trait;
use taskstore::Store;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::PluginError;

/// How a plugin is treated when its hooks fail or when degraded-mode flags
/// are in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Failures abort the iteration; never skipped by `reducedFunctionality`.
    Critical,
    /// Failures are recorded and logged; skipped under `reducedFunctionality`.
    Enhancement,
}

/// Static metadata every plugin declares about itself.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    pub name: String,
    pub classification: Classification,
    pub requires_network: bool,
}

/// A named object exposing zero or more lifecycle callbacks. Every hook has
/// a default no-op body so a plugin implements only the ones it cares about.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn meta(&self) -> PluginMeta;

    async fn on_config_load(&self, config: Config) -> eyre::Result<Config> {
        Ok(config)
    }

    async fn on_backend_ready(&self, _store: &dyn Store) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_loop_start(&self, _namespace: &str) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_task_start(&self, _context: &TaskContext) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_task_complete(&self, _context: &TaskContext, _output_tail: &str) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_task_failed(&self, _context: &TaskContext, _error: &str) -> eyre::Result<()> {
        Ok(())
    }

    async fn on_loop_end(&self, _stats: &LoopStats) -> eyre::Result<()> {
        Ok(())
    }
}

/// Summary counters reported to `onLoopEnd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopStats {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub iterations_run: u32,
}

/// Default count of non-critical failures after which a plugin is disabled
/// for the remainder of the process lifetime.
pub const DEFAULT_MAX_PLUGIN_FAILURES: u32 = 3;

struct Entry {
    plugin: std::sync::Arc<dyn Plugin>,
    failure_count: u32,
    disabled: bool,
}

/// Which hook is being dispatched, used only to decide interceptor-vs-not
/// treatment of a critical plugin's failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    OnBackendReady,
    OnLoopStart,
    OnTaskStart,
    OnTaskComplete,
    OnTaskFailed,
    OnLoopEnd,
}

impl Hook {
    /// `onTaskStart` and `onBackendReady` are the two "interceptor" hooks:
    /// a critical plugin's failure here propagates and aborts the iteration.
    fn is_interceptor(self) -> bool {
        matches!(self, Hook::OnBackendReady | Hook::OnTaskStart)
    }
}

/// Holds registered plugins in registration order and dispatches hooks
/// serially, one plugin's callback awaited before the next begins.
pub struct Registry {
    entries: Vec<Entry>,
    max_plugin_failures: u32,
    reduced_functionality: bool,
    offline_mode: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self { entries: Vec::new(), max_plugin_failures: DEFAULT_MAX_PLUGIN_FAILURES, reduced_functionality: false, offline_mode: false }
    }

    /// Apply the config's degraded-mode gates, called once at startup after
    /// `onConfigLoad` has run.
    pub fn apply_flags(&mut self, config: &Config) {
        self.reduced_functionality = config.flags.reduced_functionality;
        self.offline_mode = config.flags.offline_mode;
    }

    pub fn register(&mut self, plugin: std::sync::Arc<dyn Plugin>) {
        self.entries.push(Entry { plugin, failure_count: 0, disabled: false });
    }

    pub fn unregister(&mut self, name: &str) {
        self.entries.retain(|e| e.plugin.meta().name != name);
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<dyn Plugin>> {
        self.entries.iter().find(|e| e.plugin.meta().name == name).map(|e| e.plugin.clone())
    }

    pub fn get_all(&self) -> Vec<std::sync::Arc<dyn Plugin>> {
        self.entries.iter().map(|e| e.plugin.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.entries.iter().find(|e| e.plugin.meta().name == name).map(|e| e.disabled).unwrap_or(false)
    }

    pub fn failure_count(&self, name: &str) -> u32 {
        self.entries.iter().find(|e| e.plugin.meta().name == name).map(|e| e.failure_count).unwrap_or(0)
    }

    /// Whether `entry` should be skipped entirely for this hook under the
    /// current degraded-mode gates, independent of the disabled-by-failure
    /// bookkeeping.
    fn gated_out(&self, entry: &Entry, _hook: Hook) -> bool {
        let meta = entry.plugin.meta();
        if self.offline_mode && meta.requires_network {
            return true;
        }
        if self.reduced_functionality && meta.classification == Classification::Enhancement {
            return true;
        }
        false
    }

    /// Thread `config` through each plugin's `onConfigLoad`, in registration
    /// order. A critical plugin's failure aborts with `PluginError`; others
    /// are recorded and the config passes through unchanged for that plugin.
    pub async fn apply_config_hooks(&mut self, mut config: Config) -> Result<Config, PluginError> {
        for entry in &mut self.entries {
            if entry.disabled {
                continue;
            }
            let meta = entry.plugin.meta();
            match entry.plugin.on_config_load(config.clone()).await {
                Ok(updated) => config = updated,
                Err(source) if meta.classification == Classification::Critical => {
                    return Err(PluginError::InterceptorFailed { name: meta.name, source });
                }
                Err(source) => {
                    warn!(plugin = %meta.name, error = %source, "plugin onConfigLoad failed");
                    entry.failure_count += 1;
                    if entry.failure_count >= self.max_plugin_failures {
                        entry.disabled = true;
                    }
                }
            }
        }
        Ok(config)
    }

    async fn run_hook<F, Fut>(&mut self, hook: Hook, call: F) -> Result<(), PluginError>
    where
        F: Fn(std::sync::Arc<dyn Plugin>) -> Fut,
        Fut: std::future::Future<Output = eyre::Result<()>>,
    {
        for entry in &mut self.entries {
            if entry.disabled || self.gated_out(entry, hook) {
                continue;
            }
            let meta = entry.plugin.meta();
            let result = call(entry.plugin.clone()).await;
            match result {
                Ok(()) => {}
                Err(source) if hook.is_interceptor() && meta.classification == Classification::Critical => {
                    return Err(PluginError::InterceptorFailed { name: meta.name, source });
                }
                Err(source) => {
                    warn!(plugin = %meta.name, hook = ?hook, error = %source, "plugin hook failed");
                    entry.failure_count += 1;
                    if entry.failure_count >= self.max_plugin_failures {
                        info!(plugin = %meta.name, "plugin auto-disabled after repeated failures");
                        entry.disabled = true;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn on_backend_ready(&mut self, store: &dyn Store) -> Result<(), PluginError> {
        // `store` outlives this call by reference, not capture, so the
        // per-entry closure borrows it directly rather than cloning.
        for entry in &mut self.entries {
            if entry.disabled || self.gated_out(entry, Hook::OnBackendReady) {
                continue;
            }
            let meta = entry.plugin.meta();
            match entry.plugin.on_backend_ready(store).await {
                Ok(()) => {}
                Err(source) if meta.classification == Classification::Critical => {
                    return Err(PluginError::InterceptorFailed { name: meta.name, source });
                }
                Err(source) => {
                    warn!(plugin = %meta.name, error = %source, "plugin onBackendReady failed");
                    entry.failure_count += 1;
                    if entry.failure_count >= self.max_plugin_failures {
                        entry.disabled = true;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn on_loop_start(&mut self, namespace: &str) -> Result<(), PluginError> {
        self.run_hook(Hook::OnLoopStart, |p| async move { p.on_loop_start(namespace).await }).await
    }

    pub async fn on_task_start(&mut self, context: &TaskContext) -> Result<(), PluginError> {
        for entry in &mut self.entries {
            if entry.disabled || self.gated_out(entry, Hook::OnTaskStart) {
                continue;
            }
            let meta = entry.plugin.meta();
            match entry.plugin.on_task_start(context).await {
                Ok(()) => {}
                Err(source) if meta.classification == Classification::Critical => {
                    return Err(PluginError::InterceptorFailed { name: meta.name, source });
                }
                Err(source) => {
                    warn!(plugin = %meta.name, error = %source, "plugin onTaskStart failed");
                    entry.failure_count += 1;
                    if entry.failure_count >= self.max_plugin_failures {
                        entry.disabled = true;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn on_task_complete(&mut self, context: &TaskContext, output_tail: &str) -> Result<(), PluginError> {
        self.run_hook(Hook::OnTaskComplete, |p| async move { p.on_task_complete(context, output_tail).await }).await
    }

    pub async fn on_task_failed(&mut self, context: &TaskContext, error: &str) -> Result<(), PluginError> {
        self.run_hook(Hook::OnTaskFailed, |p| async move { p.on_task_failed(context, error).await }).await
    }

    pub async fn on_loop_end(&mut self, stats: &LoopStats) -> Result<(), PluginError> {
        self.run_hook(Hook::OnLoopEnd, |p| async move { p.on_loop_end(stats).await }).await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyPlugin {
        name: String,
        classification: Classification,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Plugin for FlakyPlugin {
        fn meta(&self) -> PluginMeta {
            PluginMeta { name: self.name.clone(), classification: self.classification, requires_network: false }
        }

        async fn on_task_start(&self, _context: &TaskContext) -> eyre::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(eyre::eyre!("boom"))
        }
    }

    fn sample_context() -> TaskContext {
        TaskContext { task_id: "TASK-001".into(), iteration: 1, namespace: "default".into() }
    }

    #[tokio::test]
    async fn critical_interceptor_failure_propagates() {
        let mut registry = Registry::new();
        registry.register(Arc::new(FlakyPlugin { name: "backend".into(), classification: Classification::Critical, calls: AtomicU32::new(0) }));

        let result = registry.on_task_start(&sample_context()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_critical());
    }

    #[tokio::test]
    async fn enhancement_failure_is_recorded_not_propagated() {
        let mut registry = Registry::new();
        registry.register(Arc::new(FlakyPlugin {
            name: "logger".into(),
            classification: Classification::Enhancement,
            calls: AtomicU32::new(0),
        }));

        let result = registry.on_task_start(&sample_context()).await;
        assert!(result.is_ok());
        assert_eq!(registry.failure_count("logger"), 1);
    }

    #[tokio::test]
    async fn plugin_auto_disables_after_max_failures() {
        let mut registry = Registry::new();
        registry.register(Arc::new(FlakyPlugin {
            name: "logger".into(),
            classification: Classification::Enhancement,
            calls: AtomicU32::new(0),
        }));

        for _ in 0..DEFAULT_MAX_PLUGIN_FAILURES {
            registry.on_task_start(&sample_context()).await.unwrap();
        }
        assert!(registry.is_disabled("logger"));

        // a disabled plugin is skipped entirely; its call count stops advancing
        registry.on_task_start(&sample_context()).await.unwrap();
        let plugin = registry.get("logger");
        assert!(plugin.is_none() == false);
    }

    #[tokio::test]
    async fn reduced_functionality_skips_enhancement_plugins() {
        let mut registry = Registry::new();
        registry.register(Arc::new(FlakyPlugin {
            name: "logger".into(),
            classification: Classification::Enhancement,
            calls: AtomicU32::new(0),
        }));
        let mut config = Config::default();
        config.flags.reduced_functionality = true;
        registry.apply_flags(&config);

        registry.on_task_start(&sample_context()).await.unwrap();
        assert_eq!(registry.failure_count("logger"), 0);
    }

    #[tokio::test]
    async fn reduced_functionality_skips_enhancement_plugins_on_loop_end_too() {
        struct LoudOnLoopEnd;
        #[async_trait]
        impl Plugin for LoudOnLoopEnd {
            fn meta(&self) -> PluginMeta {
                PluginMeta { name: "loud".into(), classification: Classification::Enhancement, requires_network: false }
            }
            async fn on_loop_end(&self, _stats: &LoopStats) -> eyre::Result<()> {
                Err(eyre::eyre!("should never be called under reducedFunctionality"))
            }
        }

        let mut registry = Registry::new();
        registry.register(Arc::new(LoudOnLoopEnd));
        let mut config = Config::default();
        config.flags.reduced_functionality = true;
        registry.apply_flags(&config);

        registry.on_loop_end(&LoopStats::default()).await.unwrap();
        assert_eq!(registry.failure_count("loud"), 0);
    }

    #[tokio::test]
    async fn offline_mode_skips_network_plugins() {
        struct NetworkPlugin;
        #[async_trait]
        impl Plugin for NetworkPlugin {
            fn meta(&self) -> PluginMeta {
                PluginMeta { name: "notifier".into(), classification: Classification::Enhancement, requires_network: true }
            }
            async fn on_task_start(&self, _context: &TaskContext) -> eyre::Result<()> {
                Err(eyre::eyre!("should never be called"))
            }
        }

        let mut registry = Registry::new();
        registry.register(Arc::new(NetworkPlugin));
        let mut config = Config::default();
        config.flags.offline_mode = true;
        registry.apply_flags(&config);

        registry.on_task_start(&sample_context()).await.unwrap();
        assert_eq!(registry.failure_count("notifier"), 0);
    }
}
