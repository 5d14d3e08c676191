//! Runtime configuration.
//!
//! Every section has working defaults; a TOML file only needs the keys it
//! changes.
//!
//! ```toml
//! [reservation]
//! hold_secs = 90
//!
//! [payout]
//! economy_multiplier = 1.2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::board::BoardConfig;
use crate::payout::PayoutConfig;
use crate::reservation::ReservationConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Hard deadline = accepted_at + allotted window × ratio.
    pub expiry_ratio: f64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self { expiry_ratio: 2.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub sweep_interval_secs: u64,
    /// Offline longer than this and the load is abandoned.
    pub grace_secs: i64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 900,
            grace_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsuranceConfig {
    pub claim_delay_secs: i64,
    /// Premium per started day of coverage, indexed by the highest covered tier.
    pub daily_premium: [i64; 4],
}

impl Default for InsuranceConfig {
    fn default() -> Self {
        Self {
            claim_delay_secs: 86_400,
            daily_premium: [150, 300, 600, 1_000],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub interval_ms: u64,
    pub batch_size: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Checkpoint after every committed change.
    pub write_through: bool,
    pub state_file: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            write_through: true,
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaulageConfig {
    pub board: BoardConfig,
    pub reservation: ReservationConfig,
    pub lifecycle: LifecycleConfig,
    pub recovery: RecoveryConfig,
    pub insurance: InsuranceConfig,
    pub publisher: PublisherConfig,
    pub payout: PayoutConfig,
    pub persistence: PersistenceConfig,
}

impl HaulageConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.board.regions.is_empty() {
            return invalid("board.regions must not be empty");
        }
        if self.board.refresh_interval_secs <= 0 || self.board.posting_ttl_secs <= 0 {
            return invalid("board intervals must be positive");
        }
        if self.reservation.hold_secs <= 0 {
            return invalid("reservation.hold_secs must be positive");
        }
        if self.reservation.release_limit == 0 {
            return invalid("reservation.release_limit must be at least 1");
        }
        if !(self.lifecycle.expiry_ratio >= 1.0) {
            return invalid("lifecycle.expiry_ratio must be at least 1.0");
        }
        if self.recovery.sweep_interval_secs == 0 {
            return invalid("recovery.sweep_interval_secs must be positive");
        }
        if self.recovery.grace_secs < 0 || self.insurance.claim_delay_secs < 0 {
            return invalid("grace and claim delay cannot be negative");
        }
        if self.insurance.daily_premium.iter().any(|p| *p < 0) {
            return invalid("insurance.daily_premium cannot be negative");
        }
        if self.publisher.batch_size == 0 {
            return invalid("publisher.batch_size must be positive");
        }
        let p = &self.payout;
        if !(0.0..=1.0).contains(&p.compliance.cap) {
            return invalid("payout.compliance.cap must be within 0..=1");
        }
        if !(p.economy_multiplier.is_finite() && p.economy_multiplier > 0.0) {
            return invalid("payout.economy_multiplier must be positive");
        }
        if p.night_start_hour > 23 || p.night_end_hour > 23 {
            return invalid("payout night hours must be 0..=23");
        }
        Ok(())
    }
}
