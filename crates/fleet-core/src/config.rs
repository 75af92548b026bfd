//! fleetd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Fleet, Instance};

const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1000;
const DEFAULT_BIND_RETRY_MS: u64 = 500;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
const DEFAULT_RESYNC_POLLS: u64 = 50;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetdConfig {
    pub scheduler: Option<SchedulerConfig>,
    pub watch: Option<WatchConfig>,
    pub store: Option<StoreConfig>,
    pub log: Option<LogConfig>,
    pub seed: Option<SeedConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub sweep_interval_ms: Option<u64>,
    pub bind_retry_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    pub poll_interval_ms: Option<u64>,
    /// Re-emit every object once per this many polls; 0 disables resync.
    pub resync_polls: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory for the on-disk store. In-memory when unset.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: Option<LogFormat>,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: Option<String>,
}

/// Objects written to the store at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub fleets: Vec<Fleet>,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

/// Resolved timings and capacities for the scheduler runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub sweep_interval: Duration,
    pub bind_retry: Duration,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub resync_polls: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            bind_retry: Duration::from_millis(DEFAULT_BIND_RETRY_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            resync_polls: DEFAULT_RESYNC_POLLS,
        }
    }
}

impl FleetdConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: FleetdConfig = toml::from_str(content)?;
        config.scheduler_settings()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Resolve defaults and reject zero intervals or capacities.
    pub fn scheduler_settings(&self) -> CoreResult<SchedulerSettings> {
        let sched = self.scheduler.clone().unwrap_or_default();
        let watch = self.watch.clone().unwrap_or_default();

        let sweep_ms = sched.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS);
        let retry_ms = sched.bind_retry_ms.unwrap_or(DEFAULT_BIND_RETRY_MS);
        let capacity = sched.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        let poll_ms = watch.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        if sweep_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "scheduler.sweep_interval_ms must be > 0".to_string(),
            ));
        }
        if poll_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "watch.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "scheduler.queue_capacity must be > 0".to_string(),
            ));
        }

        Ok(SchedulerSettings {
            sweep_interval: Duration::from_millis(sweep_ms),
            bind_retry: Duration::from_millis(retry_ms),
            queue_capacity: capacity,
            poll_interval: Duration::from_millis(poll_ms),
            resync_polls: watch.resync_polls.unwrap_or(DEFAULT_RESYNC_POLLS),
        })
    }

    pub fn log_format(&self) -> LogFormat {
        self.log.as_ref().and_then(|l| l.format).unwrap_or_default()
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.store.as_ref().and_then(|s| s.data_dir.as_deref())
    }
}
