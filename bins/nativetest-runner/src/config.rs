// Runner configuration management for nativetest
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/runner.json";

/// 20 minutes per container run
pub const DEFAULT_TIMEOUT_SECS: u64 = 20 * 60;

pub const DEFAULT_EXECUTABLE_PATTERN: &str = r"[qu][Tt]ests?(\.exe)?$";

pub const ENV_TIMEOUT_SECS: &str = "NATIVETEST_TIMEOUT_SECS";
pub const ENV_PARALLELISM: &str = "NATIVETEST_PARALLELISM";
pub const ENV_LAUNCHER: &str = "NATIVETEST_LAUNCHER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Wall-clock budget for one container process
    pub timeout_secs: u64,
    /// Upper bound on concurrently running containers (None = CPU count)
    pub max_parallelism: Option<usize>,
    /// Process working directory (None = system temp dir)
    pub working_dir: Option<PathBuf>,
    /// Arguments passed to every container
    pub container_args: Vec<String>,
    /// Optional wrapper program; the container path becomes its argument
    pub launcher: Option<String>,
    pub launcher_args: Vec<String>,
    /// File-name regex used by discovery
    pub executable_pattern: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_parallelism: None,
            working_dir: None,
            container_args: Vec::new(),
            launcher: None,
            launcher_args: Vec::new(),
            executable_pattern: DEFAULT_EXECUTABLE_PATTERN.to_string(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Runner config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: RunnerConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config/runner.json if present, defaults otherwise
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply NATIVETEST_* environment overrides
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            self.timeout_secs = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_TIMEOUT_SECS, value))?;
        }
        if let Some(value) = lookup(ENV_PARALLELISM) {
            let parsed: usize = value
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: {}", ENV_PARALLELISM, value))?;
            self.max_parallelism = Some(parsed);
        }
        if let Some(value) = lookup(ENV_LAUNCHER) {
            let value = value.trim();
            self.launcher = if value.is_empty() { None } else { Some(value.to_string()) };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        if self.max_parallelism == Some(0) {
            bail!("max_parallelism must be greater than zero");
        }
        Regex::new(&self.executable_pattern)
            .with_context(|| format!("Invalid executable_pattern: {}", self.executable_pattern))?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured bound, or the number of available processing units
    pub fn parallelism(&self) -> usize {
        self.max_parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn executable_regex(&self) -> Result<Regex> {
        Regex::new(&self.executable_pattern)
            .with_context(|| format!("Invalid executable_pattern: {}", self.executable_pattern))
    }
}
