use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the meshmon collector.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for persisted runtime state (circuit breaker files).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Output directory for generated report artifacts.
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,

    /// Path to the metric store snapshot file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Companion node polling configuration.
    #[serde(default = "default_companion")]
    pub companion: NodeConfig,

    /// Repeater node polling configuration.
    #[serde(default = "default_repeater")]
    pub repeater: NodeConfig,

    /// Remote request reliability configuration (retries, circuit breaker).
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Include auto-discovered telemetry.* metrics in charts. Default: false.
    #[serde(default)]
    pub telemetry_enabled: bool,
}

/// Per-role polling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Interval between polls of this node.
    #[serde(with = "humantime_serde")]
    pub step: Duration,
}

/// Remote request reliability configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Maximum attempts per poll before reporting failure. Default: 2.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Wait between retry attempts. Default: 4s.
    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Consecutive failures before the circuit breaker opens. Default: 6.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// How long the breaker stays open after tripping. Default: 1h.
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./data/state")
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("./out")
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/metrics.json")
}

fn default_companion() -> NodeConfig {
    NodeConfig {
        step: Duration::from_secs(60),
    }
}

fn default_repeater() -> NodeConfig {
    NodeConfig {
        step: Duration::from_secs(900),
    }
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(4)
}

fn default_max_failures() -> u32 {
    6
}

fn default_cooldown() -> Duration {
    Duration::from_secs(3600)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_dir: default_state_dir(),
            out_dir: default_out_dir(),
            db_path: default_db_path(),
            companion: default_companion(),
            repeater: default_repeater(),
            remote: RemoteConfig::default(),
            telemetry_enabled: false,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff: default_retry_backoff(),
            max_failures: default_max_failures(),
            cooldown: default_cooldown(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.companion.step.is_zero() {
            bail!("companion.step must be > 0");
        }

        if self.repeater.step.is_zero() {
            bail!("repeater.step must be > 0");
        }

        if self.remote.retry_attempts == 0 {
            bail!("remote.retry_attempts must be >= 1");
        }

        if self.remote.max_failures == 0 {
            bail!("remote.max_failures must be >= 1");
        }

        if self.remote.cooldown.is_zero() {
            bail!("remote.cooldown must be > 0");
        }

        Ok(())
    }

    /// State file path for a role's circuit breaker.
    pub fn circuit_state_file(&self, role: crate::catalog::Role) -> PathBuf {
        self.state_dir.join(format!("{}_circuit.json", role.as_str()))
    }
}
