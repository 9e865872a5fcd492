//! Configuration types for Quire clients.
//!
//! Configuration is loaded from TOML files or built in code. All config
//! structs validate their values at construction time via fallible builders.
//! Post-deserialization validation is available via the `validate()` method
//! on each struct.

// The schemars `JsonSchema` derive macro internally uses `.unwrap()` in its
// expansions.
#![allow(clippy::disallowed_methods)]

mod client;
mod ledger;

pub use client::*;
pub use ledger::*;
use snafu::Snafu;

/// Configuration validation error.
///
/// Returned when a configuration value is outside its valid range.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::ProtocolVersion;

    // =========================================================================
    // ClientConfig
    // =========================================================================

    #[test]
    fn client_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.num_channels_per_bookie, 1);
        assert_eq!(config.bookie_error_threshold_per_interval, 100);
        assert_eq!(config.add_entry_timeout, Duration::from_secs(5));
        assert_eq!(config.max_frame_size, 5 * 1024 * 1024);
        assert!(!config.writable_when_disconnected);
        assert_eq!(config.protocol_version, ProtocolVersion::V3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_builder_matches_default() {
        let built = ClientConfig::builder().build().unwrap();
        assert_eq!(built, ClientConfig::default());
    }

    #[test]
    fn client_builder_accepts_zero_channels() {
        // Rejected later, when a pool is constructed.
        let config = ClientConfig::builder().num_channels_per_bookie(0).build().unwrap();
        assert_eq!(config.num_channels_per_bookie, 0);
    }

    #[test]
    fn client_builder_rejects_zero_timeout() {
        let err = ClientConfig::builder().read_entry_timeout(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("read_entry_timeout"));
    }

    #[test]
    fn client_builder_rejects_tiny_frames() {
        let err = ClientConfig::builder().max_frame_size(512).build().unwrap_err();
        assert!(err.to_string().contains("max_frame_size"));
    }

    #[test]
    fn client_builder_rejects_zero_executor_threads() {
        assert!(ClientConfig::builder().executor_threads(0).build().is_err());
    }

    #[test]
    fn client_deserializes_humantime_durations() {
        let config: ClientConfig = toml::from_str(
            r#"
            num_channels_per_bookie = 3
            add_entry_timeout = "250ms"
            bookie_error_interval = "2m"
            protocol_version = "V2"
            "#,
        )
        .unwrap();
        assert_eq!(config.num_channels_per_bookie, 3);
        assert_eq!(config.add_entry_timeout, Duration::from_millis(250));
        assert_eq!(config.bookie_error_interval, Duration::from_secs(120));
        assert_eq!(config.protocol_version, ProtocolVersion::V2);
        assert_eq!(config.read_entry_timeout, Duration::from_secs(5));
    }

    #[test]
    fn client_serializes_durations_as_strings() {
        let json = serde_json::to_value(ClientConfig::default()).unwrap();
        assert_eq!(json["add_entry_timeout"], "5s");
        assert_eq!(json["bookie_error_interval"], "1m");
    }

    // =========================================================================
    // LedgerConfig
    // =========================================================================

    #[test]
    fn ledger_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.min_advertised_ledger_id, 0);
        assert_eq!(config.ledger_id_retries, 3);
        assert!(config.confirm_ensemble);
        assert!(config.store_ctime);
    }

    #[test]
    fn ledger_floor_boundary() {
        assert!(LedgerConfig::builder().min_advertised_ledger_id(-1).build().is_ok());
        let err = LedgerConfig::builder().min_advertised_ledger_id(-2).build().unwrap_err();
        assert!(err.to_string().contains("min_advertised_ledger_id"));
    }

    #[test]
    fn ledger_validate_after_deserialize() {
        let config: LedgerConfig = toml::from_str("min_advertised_ledger_id = -5").unwrap();
        assert!(config.validate().is_err());
    }
}
