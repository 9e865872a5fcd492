//! Bookie client configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::protocol::ProtocolVersion;

/// Smallest frame limit accepted; smaller limits cannot carry a request header.
const MIN_FRAME_SIZE: usize = 1024;

fn default_num_channels_per_bookie() -> usize {
    1
}

fn default_bookie_error_threshold_per_interval() -> u64 {
    100
}

fn default_bookie_error_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_add_entry_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_entry_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout_task_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_frame_size() -> usize {
    5 * 1024 * 1024
}

fn default_write_buffer_high_water_mark() -> usize {
    64 * 1024
}

fn default_executor_threads() -> usize {
    4
}

/// Configuration of the bookie client and its connection pools.
///
/// # Validation Rules
///
/// - all timeouts and intervals must be > 0
/// - `max_frame_size` must be >= 1 KiB
/// - `write_buffer_high_water_mark` must be > 0
/// - `executor_threads` must be > 0
///
/// `num_channels_per_bookie` is deliberately not validated here: a value of 0
/// is rejected when a connection pool is constructed.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use quire_types::config::ClientConfig;
/// let config = ClientConfig::builder()
///     .num_channels_per_bookie(2)
///     .add_entry_timeout(Duration::from_secs(2))
///     .build()
///     .expect("valid client config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClientConfig {
    /// Physical connections opened to each bookie.
    ///
    /// Requests for the same ledger always use the same connection.
    #[serde(default = "default_num_channels_per_bookie")]
    pub num_channels_per_bookie: usize,
    /// Errors within one interval after which a bookie is reported faulty.
    ///
    /// 0 disables fault reporting.
    #[serde(default = "default_bookie_error_threshold_per_interval")]
    pub bookie_error_threshold_per_interval: u64,
    /// Length of the error-counting interval.
    #[serde(default = "default_bookie_error_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub bookie_error_interval: Duration,
    /// Timeout for appends, LAC writes, and force calls.
    #[serde(default = "default_add_entry_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub add_entry_timeout: Duration,
    /// Timeout for reads, LAC reads, and entry listings.
    #[serde(default = "default_read_entry_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub read_entry_timeout: Duration,
    /// How often pending requests are scanned for timeouts.
    #[serde(default = "default_timeout_task_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub timeout_task_interval: Duration,
    /// TCP connection establishment timeout.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub connect_timeout: Duration,
    /// Maximum encoded frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Unflushed outbound bytes above which a connection reports not writable.
    #[serde(default = "default_write_buffer_high_water_mark")]
    pub write_buffer_high_water_mark: usize,
    /// Writability reported for a connection that is not established yet.
    #[serde(default)]
    pub writable_when_disconnected: bool,
    /// Protocol revision used unless a connection forces V3.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,
    /// Worker count of the ordered callback executor.
    #[serde(default = "default_executor_threads")]
    pub executor_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            num_channels_per_bookie: default_num_channels_per_bookie(),
            bookie_error_threshold_per_interval: default_bookie_error_threshold_per_interval(),
            bookie_error_interval: default_bookie_error_interval(),
            add_entry_timeout: default_add_entry_timeout(),
            read_entry_timeout: default_read_entry_timeout(),
            timeout_task_interval: default_timeout_task_interval(),
            connect_timeout: default_connect_timeout(),
            max_frame_size: default_max_frame_size(),
            write_buffer_high_water_mark: default_write_buffer_high_water_mark(),
            writable_when_disconnected: false,
            protocol_version: ProtocolVersion::default(),
            executor_threads: default_executor_threads(),
        }
    }
}

#[bon::bon]
impl ClientConfig {
    /// Creates a new client configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_num_channels_per_bookie())] num_channels_per_bookie: usize,
        #[builder(default = default_bookie_error_threshold_per_interval())]
        bookie_error_threshold_per_interval: u64,
        #[builder(default = default_bookie_error_interval())] bookie_error_interval: Duration,
        #[builder(default = default_add_entry_timeout())] add_entry_timeout: Duration,
        #[builder(default = default_read_entry_timeout())] read_entry_timeout: Duration,
        #[builder(default = default_timeout_task_interval())] timeout_task_interval: Duration,
        #[builder(default = default_connect_timeout())] connect_timeout: Duration,
        #[builder(default = default_max_frame_size())] max_frame_size: usize,
        #[builder(default = default_write_buffer_high_water_mark())]
        write_buffer_high_water_mark: usize,
        #[builder(default)] writable_when_disconnected: bool,
        #[builder(default)] protocol_version: ProtocolVersion,
        #[builder(default = default_executor_threads())] executor_threads: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            num_channels_per_bookie,
            bookie_error_threshold_per_interval,
            bookie_error_interval,
            add_entry_timeout,
            read_entry_timeout,
            timeout_task_interval,
            connect_timeout,
            max_frame_size,
            write_buffer_high_water_mark,
            writable_when_disconnected,
            protocol_version,
            executor_threads,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ClientConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("bookie_error_interval", self.bookie_error_interval),
            ("add_entry_timeout", self.add_entry_timeout),
            ("read_entry_timeout", self.read_entry_timeout),
            ("timeout_task_interval", self.timeout_task_interval),
            ("connect_timeout", self.connect_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Validation { message: format!("{name} must be > 0") });
            }
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_frame_size must be >= {MIN_FRAME_SIZE}, got {}",
                    self.max_frame_size
                ),
            });
        }
        if self.write_buffer_high_water_mark == 0 {
            return Err(ConfigError::Validation {
                message: "write_buffer_high_water_mark must be > 0".to_string(),
            });
        }
        if self.executor_threads == 0 {
            return Err(ConfigError::Validation {
                message: "executor_threads must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
