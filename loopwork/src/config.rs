//! Loopwork configuration types and layered loading: explicit `--config`
//! path, then project-local `.loopwork.yml`, then a user config directory,
//! then built-in defaults — the same fallback chain as the teacher's
//! `Config::load`.

use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level loopwork configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for runs, state, and the JSON store (defaults to cwd).
    #[serde(rename = "project-root")]
    pub project_root: PathBuf,

    /// Task store backend: `json` is the only adapter shipped in this core;
    /// `github` is named by the interface but not implemented here.
    pub backend: String,

    /// Logical partition of state, session directories, and supervisor
    /// tracking, enabling multiple independent loops per project.
    pub namespace: String,

    /// Optional feature tag filter applied to backlog selection.
    pub feature: Option<String>,

    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Per-task subprocess timeout, in seconds.
    pub timeout: u64,

    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    #[serde(rename = "circuit-breaker-threshold")]
    pub circuit_breaker_threshold: u32,

    /// Sleep between retry attempts on the same task, in milliseconds.
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// Sleep between iterations, in milliseconds.
    #[serde(rename = "task-delay-ms")]
    pub task_delay_ms: u64,

    #[serde(rename = "dry-run")]
    pub dry_run: bool,

    #[serde(rename = "auto-confirm")]
    pub auto_confirm: bool,

    pub flags: Flags,
}

/// Degraded-mode gates consumed by the plugin bus (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    #[serde(rename = "reduced-functionality")]
    pub reduced_functionality: bool,

    #[serde(rename = "offline-mode")]
    pub offline_mode: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self { reduced_functionality: false, offline_mode: false }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            backend: "json".to_string(),
            namespace: "default".to_string(),
            feature: None,
            max_iterations: 50,
            timeout: 600,
            max_retries: 3,
            circuit_breaker_threshold: 5,
            retry_delay_ms: 3_000,
            task_delay_ms: 2_000,
            dry_run: false,
            auto_confirm: false,
            flags: Flags::default(),
        }
    }
}

impl Config {
    /// Load configuration with the fallback chain: explicit path, then
    /// project-local `.loopwork.yml`, then the user config dir, then
    /// built-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".loopwork.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("loopwork").join("loopwork.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Absolute path to this project's hidden session/state directory.
    pub fn loopwork_dir(&self) -> PathBuf {
        self.project_root.join(".loopwork")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.loopwork_dir().join("state")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.loopwork_dir().join("runs").join(&self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = Config::default();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.timeout, 600);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.circuit_breaker_threshold, 5);
        assert_eq!(config.retry_delay_ms, 3_000);
        assert_eq!(config.task_delay_ms, 2_000);
        assert!(!config.flags.offline_mode);
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let yaml = r#"
namespace: ci
max-retries: 1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.namespace, "ci");
        assert_eq!(config.max_retries, 1);
        // unspecified fields fall back to defaults
        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.backend, "json");
    }

    #[test]
    fn runs_dir_is_namespaced_under_hidden_loopwork_dir() {
        let mut config = Config::default();
        config.project_root = PathBuf::from("/tmp/proj");
        config.namespace = "ci".to_string();
        assert_eq!(config.runs_dir(), PathBuf::from("/tmp/proj/.loopwork/runs/ci"));
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/proj/.loopwork/state"));
    }
}
