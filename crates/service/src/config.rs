use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use railworld_index::IndexConfig;

use crate::ServiceError;

/// Queue and loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Operations that can wait before new ones are dropped.
    pub queue_capacity: usize,
    /// Interval of the game-progress tick.
    pub tick_interval_ms: u64,
    /// Operations or ticks slower than this are logged.
    pub slow_op_warn_ms: u64,
    /// Newest world events kept in memory; older ones are dropped each tick.
    pub event_retention: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            tick_interval_ms: 100,
            slow_op_warn_ms: 50,
            event_retention: 1024,
        }
    }
}

impl ServiceConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn slow_op_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_op_warn_ms)
    }
}

/// Everything needed to start a world service.
///
/// ```yaml
/// index:
///   max_scale: 16
///   min_scale: 2
/// service:
///   queue_capacity: 64
///   tick_interval_ms: 100
///   slow_op_warn_ms: 50
///   event_retention: 1024
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub index: IndexConfig,
    pub service: ServiceConfig,
}

impl GameConfig {
    /// Load and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml_str(&text)?;
        tracing::info!(path = %path.as_ref().display(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ServiceError> {
        let config: GameConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        self.index
            .validate()
            .map_err(|e| ServiceError::InvalidConfig(e.to_string()))?;
        if self.service.queue_capacity == 0 {
            return Err(ServiceError::InvalidConfig(
                "queue_capacity must be positive".into(),
            ));
        }
        if self.service.tick_interval_ms == 0 {
            return Err(ServiceError::InvalidConfig(
                "tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
