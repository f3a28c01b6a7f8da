use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoordinatorError, CoordinatorResult};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Period of the background sync loop.
    pub sync_interval_ms: u64,
    /// A write that neither confirms nor rejects within this window is
    /// treated as rejected.
    pub write_timeout_ms: u64,
    /// Consecutive listings a confirmed row may be missing from before it is
    /// marked failed.
    pub missing_sync_limit: u32,
    /// Buffered store notifications per subscriber.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 5_000,
            write_timeout_ms: 60_000,
            missing_sync_limit: 3,
            event_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json(input: &str) -> CoordinatorResult<Self> {
        let config: Self = serde_json::from_str(input)
            .map_err(|err| CoordinatorError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoordinatorResult<()> {
        if self.sync_interval_ms == 0 {
            return Err(CoordinatorError::Config("sync_interval_ms must be > 0".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(CoordinatorError::Config("write_timeout_ms must be > 0".into()));
        }
        if self.missing_sync_limit == 0 {
            return Err(CoordinatorError::Config("missing_sync_limit must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(CoordinatorError::Config("event_capacity must be > 0".into()));
        }
        Ok(())
    }

    // Accessors clamp to at least 1. A validated config reads unchanged.

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn missing_limit(&self) -> u32 {
        self.missing_sync_limit.max(1)
    }

    pub fn events(&self) -> usize {
        self.event_capacity.max(1)
    }
}
