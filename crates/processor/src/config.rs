//! Configuration types for the stream engine
//!
//! Configuration is plain serde data with defaults for every field, so a YAML
//! file only needs to name what it changes. [`EngineConfig::load`] layers an
//! optional YAML file and `STREAM_ENGINE_`-prefixed environment variables over
//! the defaults (nested keys are separated by `__`, for example
//! `STREAM_ENGINE_WATERMARK__MAX_OUT_OF_ORDER_MS=2000`).

use crate::error::{Result, ValidationError, ValidationResult};
use crate::partition::PartitionStrategyKind;
use crate::watermark::LateEventPolicy;
use crate::window::SlidingMembership;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix used by [`EngineConfig::load`]
pub const ENV_PREFIX: &str = "STREAM_ENGINE_";

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instance name, used in log output
    pub name: String,

    /// Number of logical partitions, one worker each
    pub num_partitions: u32,

    /// Bounded queue length per partition before `ingest` suspends
    pub queue_capacity: usize,

    /// Built-in partitioning strategy
    pub partition_strategy: PartitionStrategyKind,

    /// Watermark configuration
    pub watermark: WatermarkConfig,

    /// Window configuration
    pub window: WindowConfig,

    /// Checkpoint configuration
    pub checkpoint: CheckpointConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            num_partitions: default_num_partitions(),
            queue_capacity: default_queue_capacity(),
            partition_strategy: PartitionStrategyKind::default(),
            watermark: WatermarkConfig::default(),
            window: WindowConfig::default(),
            checkpoint: CheckpointConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional YAML file and the environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: EngineConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document, without the environment
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = Figment::from(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult<()> {
        if self.num_partitions == 0 {
            return Err(invalid("num_partitions", "must be greater than 0"));
        }

        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be greater than 0"));
        }

        self.watermark.validate()?;
        self.checkpoint.validate()?;

        Ok(())
    }

    /// Builder-style setter for the partition count
    pub fn with_partitions(mut self, num_partitions: u32) -> Self {
        self.num_partitions = num_partitions;
        self
    }

    /// Builder-style setter for the tolerated disorder
    pub fn with_max_out_of_order(mut self, max_out_of_order_ms: u64) -> Self {
        self.watermark.max_out_of_order_ms = max_out_of_order_ms;
        self
    }
}

/// Watermark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatermarkConfig {
    /// Maximum expected disorder of event timestamps
    pub max_out_of_order_ms: u64,

    /// How often idle workers re-check their windows against the watermark
    pub check_interval_ms: u64,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            max_out_of_order_ms: default_max_out_of_order(),
            check_interval_ms: default_check_interval(),
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.check_interval_ms == 0 {
            return Err(invalid("watermark.check_interval_ms", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn max_out_of_order(&self) -> Duration {
        Duration::from_millis(self.max_out_of_order_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

/// Window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// How sliding windows assign an event to window starts
    pub sliding_membership: SlidingMembership,

    /// Handling of events behind the watermark
    pub late_events: LateEventPolicy,

    /// Emit still-open windows on graceful shutdown
    pub flush_on_shutdown: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sliding_membership: SlidingMembership::default(),
            late_events: LateEventPolicy::default(),
            flush_on_shutdown: true,
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Run the periodic checkpoint task
    pub enabled: bool,

    /// Interval between checkpoints
    pub interval_ms: u64,

    /// Checkpoints kept per partition by the in-memory sink
    pub retained_per_partition: usize,

    /// Maximum changelog records kept between checkpoints
    pub changelog_capacity: usize,

    /// Take a final checkpoint during graceful shutdown
    pub checkpoint_on_shutdown: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_checkpoint_interval(),
            retained_per_partition: default_retained_checkpoints(),
            changelog_capacity: default_changelog_capacity(),
            checkpoint_on_shutdown: true,
        }
    }
}

impl CheckpointConfig {
    pub fn validate(&self) -> ValidationResult<()> {
        if self.interval_ms == 0 {
            return Err(invalid("checkpoint.interval_ms", "must be greater than 0"));
        }
        if self.retained_per_partition == 0 {
            return Err(invalid(
                "checkpoint.retained_per_partition",
                "must be greater than 0",
            ));
        }
        if self.changelog_capacity == 0 {
            return Err(invalid("checkpoint.changelog_capacity", "must be greater than 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn default_name() -> String {
    "stream-engine".to_string()
}

fn default_num_partitions() -> u32 {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_out_of_order() -> u64 {
    5_000
}

fn default_check_interval() -> u64 {
    100
}

fn default_checkpoint_interval() -> u64 {
    10_000
}

fn default_retained_checkpoints() -> usize {
    3
}

fn default_changelog_capacity() -> usize {
    100_000
}
