//! Runtime tuning knobs and layered JSON loading.
//!
//! A committed base file carries defaults for a deployment; an optional
//! runtime file written by the host overrides individual keys. Both are
//! plain JSON and every key is optional.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure to load a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Not valid JSON or wrong shape.
    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
    /// Parsed, but a value cannot be used.
    #[error("invalid config value: {0}")]
    Invalid(&'static str),
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pending commands per event before `submit` waits.
    pub actor_queue_bound: usize,
    /// An actor with no command for this long retires.
    pub actor_idle_ms: u64,
    /// Buffer of the in-process sync event broadcast.
    pub events_capacity: usize,
    /// Outbound notification settings.
    pub sync: SyncConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            actor_queue_bound: 64,
            actor_idle_ms: 30_000,
            events_capacity: 1024,
            sync: SyncConfig::default(),
        }
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Pending events per subscriber before new ones are dropped.
    pub queue_bound: usize,
    /// Budget for a single delivery attempt.
    pub timeout_ms: u64,
    /// Pause before the one retry.
    pub retry_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_bound: 256,
            timeout_ms: 10_000,
            retry_delay_ms: 250,
        }
    }
}

impl SyncConfig {
    /// [`Self::timeout_ms`] as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// [`Self::retry_delay_ms`] as a duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl RuntimeConfig {
    /// [`Self::actor_idle_ms`] as a duration.
    pub fn actor_idle(&self) -> Duration {
        Duration::from_millis(self.actor_idle_ms)
    }

    /// Parses a JSON document; absent keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `base`, then applies `overrides` key by key. Missing files are skipped.
    pub fn load_layered(base: impl AsRef<Path>, overrides: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut merged = read_json(base.as_ref())?.unwrap_or(Value::Object(Default::default()));
        if let Some(over) = read_json(overrides.as_ref())? {
            merge_values(&mut merged, over);
        }
        let cfg: Self = serde_json::from_value(merged)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.actor_queue_bound == 0 {
            return Err(ConfigError::Invalid("actor_queue_bound must be positive"));
        }
        if self.events_capacity == 0 {
            return Err(ConfigError::Invalid("events_capacity must be positive"));
        }
        if self.sync.queue_bound == 0 {
            return Err(ConfigError::Invalid("sync.queue_bound must be positive"));
        }
        if self.sync.timeout_ms == 0 {
            return Err(ConfigError::Invalid("sync.timeout_ms must be positive"));
        }
        Ok(())
    }
}

fn read_json(path: &Path) -> Result<Option<Value>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn merge_values(base: &mut Value, over: Value) {
    match (base, over) {
        (Value::Object(base), Value::Object(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
