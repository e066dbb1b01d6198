//! Engine configuration loading with multi-layer merge

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::HistoryStore;
use crate::workflow::{
    DEFAULT_GRACE_PERIOD, DEFAULT_MAX_PARALLEL_TASKS, Resources, RunOptions, SchedulingPolicy,
    millis,
};

/// Top-level dagflow configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub defaults: Defaults,

    /// Pool capacities; derived from `max_parallel_tasks` when absent
    pub resources: Option<Resources>,

    #[serde(default)]
    pub history: HistoryConfig,
}

/// Per-run execution defaults
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "default_max_parallel_tasks")]
    pub max_parallel_tasks: usize,

    #[serde(default)]
    pub policy: SchedulingPolicy,

    /// Time in-flight nodes get to stop after cancellation
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Node admissions per second
    pub dispatch_rate: Option<f64>,

    #[serde(default = "default_dispatch_burst")]
    pub dispatch_burst: u32,

    #[serde(default)]
    pub retry_jitter: bool,
}

fn default_max_parallel_tasks() -> usize {
    DEFAULT_MAX_PARALLEL_TASKS
}

fn default_grace_period_ms() -> u64 {
    millis(DEFAULT_GRACE_PERIOD)
}

fn default_dispatch_burst() -> u32 {
    1
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_parallel_tasks: default_max_parallel_tasks(),
            policy: SchedulingPolicy::default(),
            grace_period_ms: default_grace_period_ms(),
            dispatch_rate: None,
            dispatch_burst: default_dispatch_burst(),
            retry_jitter: false,
        }
    }
}

/// Node outcome history settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database path; `~` is expanded
    pub path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl HistoryConfig {
    /// Resolved database path
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).into_owned())),
            None => HistoryStore::default_path(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/dagflow/config.toml
    /// 3. .dagflow/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path().filter(|p| p.exists()) {
            let user_config = Self::load_file(&user_config_path)
                .with_context(|| format!("loading {}", user_config_path.display()))?;
            config.merge(user_config);
        }

        let project_config_path = project_dir
            .map(|p| p.join(".dagflow/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".dagflow/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        tracing::debug!(
            max_parallel_tasks = config.defaults.max_parallel_tasks,
            policy = %config.defaults.policy,
            "Loaded engine configuration"
        );
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// ~/.config/dagflow/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dagflow/config.toml"))
    }

    /// Merge another config into this one (other takes precedence for every
    /// value it changes from the default)
    pub fn merge(&mut self, other: Self) {
        let fallback = Defaults::default();
        let theirs = other.defaults;
        if theirs.max_parallel_tasks != fallback.max_parallel_tasks {
            self.defaults.max_parallel_tasks = theirs.max_parallel_tasks;
        }
        if theirs.policy != fallback.policy {
            self.defaults.policy = theirs.policy;
        }
        if theirs.grace_period_ms != fallback.grace_period_ms {
            self.defaults.grace_period_ms = theirs.grace_period_ms;
        }
        if theirs.dispatch_rate.is_some() {
            self.defaults.dispatch_rate = theirs.dispatch_rate;
        }
        if theirs.dispatch_burst != fallback.dispatch_burst {
            self.defaults.dispatch_burst = theirs.dispatch_burst;
        }
        if theirs.retry_jitter {
            self.defaults.retry_jitter = true;
        }

        if other.resources.is_some() {
            self.resources = other.resources;
        }

        if !other.history.enabled {
            self.history.enabled = false;
        }
        if other.history.path.is_some() {
            self.history.path = other.history.path;
        }
    }

    /// Options for one run
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            max_parallel_tasks: self.defaults.max_parallel_tasks.max(1),
            policy: self.defaults.policy,
            capacity: self.resources,
            grace_period: Duration::from_millis(self.defaults.grace_period_ms),
            dispatch_rate: self.defaults.dispatch_rate.filter(|r| *r > 0.0),
            dispatch_burst: self.defaults.dispatch_burst.max(1),
            retry_jitter: self.defaults.retry_jitter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let options = EngineConfig::default().run_options();
        assert_eq!(options, RunOptions::default());
        assert!(EngineConfig::default().history.enabled);
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [defaults]
            max_parallel_tasks = 8
            policy = "deadline_driven"
            grace_period_ms = 250
            dispatch_rate = 20.0

            [resources]
            cpu = 4
            memory = 2048

            [history]
            path = "~/dagflow-test/history.db"
        "#
        )
        .unwrap();

        let config = EngineConfig::load_file(&config_path).unwrap();
        let options = config.run_options();
        assert_eq!(options.max_parallel_tasks, 8);
        assert_eq!(options.policy, SchedulingPolicy::DeadlineDriven);
        assert_eq!(options.grace_period, Duration::from_millis(250));
        assert_eq!(options.dispatch_rate, Some(20.0));
        assert_eq!(options.capacity, Some(Resources::new(4, 2048, 0)));
        assert!(!config.history.db_path().unwrap().starts_with("~"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: Result<EngineConfig, _> = toml::from_str(
            r#"
            [defaults]
            max_paralel_tasks = 2
        "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut base = EngineConfig::default();
        base.defaults.max_parallel_tasks = 2;
        base.defaults.policy = SchedulingPolicy::Adaptive;

        let mut project = EngineConfig::default();
        project.defaults.max_parallel_tasks = 6;
        project.resources = Some(Resources::new(6, 0, 6));
        project.history.enabled = false;

        base.merge(project);

        assert_eq!(base.defaults.max_parallel_tasks, 6);
        // Untouched in the override, so the earlier layer survives
        assert_eq!(base.defaults.policy, SchedulingPolicy::Adaptive);
        assert_eq!(base.resources, Some(Resources::new(6, 0, 6)));
        assert!(!base.history.enabled);
    }

    #[test]
    fn test_project_layer() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".dagflow")).unwrap();
        std::fs::write(
            dir.path().join(".dagflow/config.toml"),
            "[defaults]\npolicy = \"resource_aware\"\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.defaults.policy, SchedulingPolicy::ResourceAware);
    }
}
