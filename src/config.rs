//! Runtime configuration.
//!
//! Values resolve in this order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. `tutorledger.toml` (or the file passed with `--config`)
//! 3. `TUTORLEDGER_*` environment variables, including ones loaded from `.env`

use std::fmt;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BASIS_POINTS_PER_UNIT, BasisPoints, Cents};
use crate::storage::PlatformSettingsRow;

pub const DEFAULT_CONFIG_FILE: &str = "tutorledger.toml";
const ENV_PREFIX: &str = "TUTORLEDGER_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Time-based rules of the booking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// How long after the session end a learner may open a dispute
    pub dispute_window_hours: i64,
    /// A reschedule must be requested more than this long before the session
    pub reschedule_window_hours: i64,
    /// Grace period after the session end before the sweep completes it
    pub completion_buffer_minutes: i64,
    /// Keep escrow pending until the dispute window has elapsed. When off,
    /// escrow is released as soon as the booking completes.
    pub hold_escrow_for_dispute_window: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            dispute_window_hours: 24,
            reschedule_window_hours: 24,
            completion_buffer_minutes: 15,
            hold_escrow_for_dispute_window: true,
        }
    }
}

impl Policy {
    pub fn dispute_window(&self) -> Duration {
        Duration::hours(self.dispute_window_hours)
    }

    pub fn reschedule_window(&self) -> Duration {
        Duration::hours(self.reschedule_window_hours)
    }

    pub fn completion_buffer(&self) -> Duration {
        Duration::minutes(self.completion_buffer_minutes)
    }

    /// Delay between the session end and escrow release.
    pub fn release_delay(&self) -> Duration {
        if self.hold_escrow_for_dispute_window {
            self.dispute_window().max(self.completion_buffer())
        } else {
            self.completion_buffer()
        }
    }
}

/// Defaults written to the settings table on first start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformDefaults {
    pub commission_rate_bps: BasisPoints,
    pub min_withdrawal_amount: Cents,
}

impl Default for PlatformDefaults {
    fn default() -> Self {
        Self {
            commission_rate_bps: 1000,
            min_withdrawal_amount: 50_000,
        }
    }
}

impl From<PlatformDefaults> for PlatformSettingsRow {
    fn from(defaults: PlatformDefaults) -> Self {
        PlatformSettingsRow {
            commission_rate: defaults.commission_rate_bps,
            min_withdrawal_amount: defaults.min_withdrawal_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file
    pub database: String,
    /// ISO currency code used for gateway orders
    pub currency: String,
    /// Seconds between completion sweeps
    pub sweep_interval_secs: u64,
    pub policy: Policy,
    pub platform: PlatformDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "tutorledger.db".to_string(),
            currency: "INR".to_string(),
            sweep_interval_secs: 300,
            policy: Policy::default(),
            platform: PlatformDefaults::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if it exists (non-fatal)
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay `TUTORLEDGER_*` variables resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{}{}", ENV_PREFIX, suffix);
            lookup(&name).map(|value| (name, value))
        };

        if let Some((_, value)) = var("DATABASE") {
            self.database = value;
        }
        if let Some((_, value)) = var("CURRENCY") {
            self.currency = value.to_uppercase();
        }
        if let Some((name, value)) = var("SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("DISPUTE_WINDOW_HOURS") {
            self.policy.dispute_window_hours = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("RESCHEDULE_WINDOW_HOURS") {
            self.policy.reschedule_window_hours = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("COMPLETION_BUFFER_MINUTES") {
            self.policy.completion_buffer_minutes = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("HOLD_ESCROW_FOR_DISPUTE_WINDOW") {
            self.policy.hold_escrow_for_dispute_window = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("COMMISSION_RATE_BPS") {
            self.platform.commission_rate_bps = parse_env(name, value)?;
        }
        if let Some((name, value)) = var("MIN_WITHDRAWAL_AMOUNT") {
            self.platform.min_withdrawal_amount = parse_env(name, value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.is_empty() {
            return Err(ConfigError::Validation("database path is empty".into()));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ConfigError::Validation(format!(
                "currency must be a three letter code: {}",
                self.currency
            )));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation("sweep interval must be positive".into()));
        }
        if self.policy.dispute_window_hours < 0
            || self.policy.reschedule_window_hours < 0
            || self.policy.completion_buffer_minutes < 0
        {
            return Err(ConfigError::Validation("policy durations must not be negative".into()));
        }
        if !(0..=BASIS_POINTS_PER_UNIT).contains(&self.platform.commission_rate_bps) {
            return Err(ConfigError::Validation(format!(
                "commission rate must be between 0 and {} basis points",
                BASIS_POINTS_PER_UNIT
            )));
        }
        if self.platform.min_withdrawal_amount < 0 {
            return Err(ConfigError::Validation("minimum withdrawal must not be negative".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database:            {}", self.database)?;
        writeln!(f, "Currency:            {}", self.currency)?;
        writeln!(f, "Sweep interval:      {}s", self.sweep_interval_secs)?;
        writeln!(f, "Dispute window:      {}h", self.policy.dispute_window_hours)?;
        writeln!(f, "Reschedule window:   {}h", self.policy.reschedule_window_hours)?;
        writeln!(f, "Completion buffer:   {}m", self.policy.completion_buffer_minutes)?;
        write!(
            f,
            "Hold escrow:         {}",
            if self.policy.hold_escrow_for_dispute_window {
                "until dispute window closes"
            } else {
                "until completion"
            }
        )
    }
}

fn parse_env<T: std::str::FromStr>(name: String, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
