//! Ledger creation configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Lowest accepted `min_advertised_ledger_id`.
///
/// `-1` is the "allocate for me" sentinel; a floor below it would let callers
/// create ledgers whose ids collide with that sentinel's meaning.
const LOWEST_ADVERTISED_FLOOR: i64 = -1;

fn default_min_advertised_ledger_id() -> i64 {
    0
}

fn default_ledger_id_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

/// Configuration of ledger creation.
///
/// # Example
///
/// ```no_run
/// # use quire_types::config::LedgerConfig;
/// let config = LedgerConfig::builder()
///     .min_advertised_ledger_id(0)
///     .ledger_id_retries(5)
///     .build()
///     .expect("valid ledger config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LedgerConfig {
    /// Smallest ledger id a caller may supply to advertised creation.
    ///
    /// Must be >= -1. Default: 0.
    #[serde(default = "default_min_advertised_ledger_id")]
    pub min_advertised_ledger_id: i64,
    /// Times a system-allocated id is regenerated after the metadata store
    /// reports it already exists. Caller-supplied ids are never retried.
    #[serde(default = "default_ledger_id_retries")]
    pub ledger_id_retries: u32,
    /// Open connection pools to every ensemble member before completing.
    #[serde(default = "default_true")]
    pub confirm_ensemble: bool,
    /// Record the creation time in ledger metadata.
    #[serde(default = "default_true")]
    pub store_ctime: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_advertised_ledger_id: default_min_advertised_ledger_id(),
            ledger_id_retries: default_ledger_id_retries(),
            confirm_ensemble: true,
            store_ctime: true,
        }
    }
}

#[bon::bon]
impl LedgerConfig {
    /// Creates a new ledger configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `min_advertised_ledger_id` < -1.
    #[builder]
    pub fn new(
        #[builder(default = default_min_advertised_ledger_id())] min_advertised_ledger_id: i64,
        #[builder(default = default_ledger_id_retries())] ledger_id_retries: u32,
        #[builder(default = true)] confirm_ensemble: bool,
        #[builder(default = true)] store_ctime: bool,
    ) -> Result<Self, ConfigError> {
        let config =
            Self { min_advertised_ledger_id, ledger_id_retries, confirm_ensemble, store_ctime };
        config.validate()?;
        Ok(config)
    }
}

impl LedgerConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_advertised_ledger_id < LOWEST_ADVERTISED_FLOOR {
            return Err(ConfigError::Validation {
                message: format!(
                    "min_advertised_ledger_id must be >= {LOWEST_ADVERTISED_FLOOR}, got {}",
                    self.min_advertised_ledger_id
                ),
            });
        }
        Ok(())
    }
}
