//! Engine Configuration
//!
//! Settings are read from a YAML file and then overridden by environment
//! variables:
//!
//! | Key | Environment | Default |
//! |---|---|---|
//! | `state_dir` | `WAYPOINT_STATE_DIR` | `.waypoint` |
//! | `steps` | `WAYPOINT_STEPS` | empty |
//! | `decisions` | `WAYPOINT_DECISIONS` | same as `steps` |
//! | `workflows` | `WAYPOINT_WORKFLOWS` | empty |
//! | `watchdog_interval_secs` | `WAYPOINT_WATCHDOG_INTERVAL` | `5` |
//! | `workers` | `WAYPOINT_WORKERS` | number of CPUs |
//!
//! Module lists in environment variables are comma-separated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file used when none is given on the command line.
pub static DEFAULT_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(path) = std::env::var("WAYPOINT_CONFIG") {
        debug!("Using config from WAYPOINT_CONFIG: {}", path);
        return PathBuf::from(path);
    }
    PathBuf::from("waypoint.yaml")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Engine settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding job records, the catalog and job log files
    pub state_dir: PathBuf,

    /// Modules declaring steps
    pub steps: Vec<String>,

    /// Modules declaring decisions; `None` means the step modules
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decisions: Option<Vec<String>>,

    /// Modules declaring workflows
    pub workflows: Vec<String>,

    pub watchdog_interval_secs: u64,

    /// Concurrent execution attempts in `serve` mode
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".waypoint"),
            steps: Vec::new(),
            decisions: None,
            workflows: Vec::new(),
            watchdog_interval_secs: 5,
            workers: num_cpus::get(),
        }
    }
}

impl EngineConfig {
    /// Loads settings from a YAML file, then applies environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = match fs::read_to_string(path) {
            Ok(content) => {
                info!("Loaded config from {}", path.display());
                serde_yaml::from_str(&content)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}; using defaults", path.display());
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies overrides from a variable lookup.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("WAYPOINT_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(list) = var("WAYPOINT_STEPS") {
            self.steps = split_modules(&list);
        }
        if let Some(list) = var("WAYPOINT_DECISIONS") {
            self.decisions = Some(split_modules(&list));
        }
        if let Some(list) = var("WAYPOINT_WORKFLOWS") {
            self.workflows = split_modules(&list);
        }
        if let Some(secs) = var("WAYPOINT_WATCHDOG_INTERVAL") {
            match secs.parse() {
                Ok(secs) => self.watchdog_interval_secs = secs,
                Err(_) => warn!("Ignoring invalid WAYPOINT_WATCHDOG_INTERVAL: {}", secs),
            }
        }
        if let Some(n) = var("WAYPOINT_WORKERS") {
            match n.parse::<usize>() {
                Ok(n) if n > 0 => self.workers = n,
                _ => warn!("Ignoring invalid WAYPOINT_WORKERS: {}", n),
            }
        }
    }

    /// Adds a module to every list that does not already contain it.
    pub fn with_module(mut self, module: &str) -> Self {
        for list in [&mut self.steps, &mut self.workflows] {
            if !list.iter().any(|m| m == module) {
                list.push(module.to_string());
            }
        }
        if let Some(decisions) = self.decisions.as_mut() {
            if !decisions.iter().any(|m| m == module) {
                decisions.push(module.to_string());
            }
        }
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Modules scanned for decisions.
    pub fn decision_modules(&self) -> &[String] {
        self.decisions.as_deref().unwrap_or(&self.steps)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Where workflows registered from YAML at run time are kept.
    pub fn workflows_dir(&self) -> PathBuf {
        self.state_dir.join("workflows")
    }

    /// Every configured module, deduplicated, in declaration order.
    pub fn modules(&self) -> Vec<String> {
        let mut modules: Vec<String> = Vec::new();
        for module in self
            .steps
            .iter()
            .chain(self.decision_modules())
            .chain(&self.workflows)
        {
            if !modules.contains(module) {
                modules.push(module.clone());
            }
        }
        modules
    }
}

fn split_modules(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}
