//! Tunables for the progression engine.
//!
//! Every number the leveling rules depend on lives here, so curves,
//! cooldowns and grant sizes can change without touching engine code.

use crate::curve::PowerCurve;
use crate::persist::RetryPolicy;
use crate::rules::{LevelingEngine, DEFAULT_LEVEL_CAP};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Errors from building or loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for a progression service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Location of the persisted records document.
    pub data_path: PathBuf,

    /// Experience needed to leave level 1 at prestige 0.
    pub base_experience: f64,

    /// Growth of the threshold with level.
    pub level_exponent: f64,

    /// Growth of the threshold with each prestige.
    pub prestige_multiplier: f64,

    /// Highest level before a prestige reset.
    pub level_cap: u32,

    /// Minimum seconds between two activity grants to the same user.
    pub cooldown_secs: u64,

    /// Smallest activity grant.
    pub grant_min: u64,

    /// Largest activity grant.
    pub grant_max: u64,

    /// Rows in a default leaderboard page.
    pub leaderboard_size: usize,

    /// Attempts per save before giving up.
    pub save_retries: u32,

    /// Delay before the first save retry, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("xp_data.json"),
            base_experience: 100.0,
            level_exponent: 2.0,
            prestige_multiplier: 1.3,
            level_cap: DEFAULT_LEVEL_CAP,
            cooldown_secs: 60,
            grant_min: 5,
            grant_max: 15,
            leaderboard_size: 10,
            save_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl ProgressionConfig {
    /// Create a config with default tunables storing data at `data_path`.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Self::default()
        }
    }

    /// Set the threshold curve constants.
    pub fn with_curve(mut self, base: f64, exponent: f64, prestige_multiplier: f64) -> Self {
        self.base_experience = base;
        self.level_exponent = exponent;
        self.prestige_multiplier = prestige_multiplier;
        self
    }

    pub fn with_level_cap(mut self, cap: u32) -> Self {
        self.level_cap = cap;
        self
    }

    pub fn with_cooldown(mut self, window: Duration) -> Self {
        self.cooldown_secs = window.as_secs();
        self
    }

    /// Set the inclusive bounds of activity grants.
    pub fn with_grant_range(mut self, min: u64, max: u64) -> Self {
        self.grant_min = min;
        self.grant_max = max;
        self
    }

    pub fn with_leaderboard_size(mut self, size: usize) -> Self {
        self.leaderboard_size = size;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.save_retries = attempts;
        self.retry_backoff_ms = backoff.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    pub fn curve(&self) -> PowerCurve {
        PowerCurve::new(
            self.base_experience,
            self.level_exponent,
            self.prestige_multiplier,
        )
    }

    pub fn engine(&self) -> LevelingEngine {
        LevelingEngine::new(self.curve(), self.level_cap)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn grant_range(&self) -> RangeInclusive<u64> {
        self.grant_min..=self.grant_max
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.save_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Check that the tunables describe a terminating, sensible curve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_experience.is_finite() || self.base_experience <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "base experience must be positive, got {}",
                self.base_experience
            )));
        }
        if !self.level_exponent.is_finite() || self.level_exponent < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "level exponent must be at least 1, got {}",
                self.level_exponent
            )));
        }
        if !self.prestige_multiplier.is_finite() || self.prestige_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "prestige multiplier must be at least 1, got {}",
                self.prestige_multiplier
            )));
        }
        if self.level_cap == 0 {
            return Err(ConfigError::Invalid("level cap must be at least 1".into()));
        }
        if self.grant_min == 0 || self.grant_min > self.grant_max {
            return Err(ConfigError::Invalid(format!(
                "grant range {}..={} must be non-empty and positive",
                self.grant_min, self.grant_max
            )));
        }
        if self.leaderboard_size == 0 {
            return Err(ConfigError::Invalid(
                "leaderboard size must be at least 1".into(),
            ));
        }
        if self.save_retries == 0 {
            return Err(ConfigError::Invalid(
                "save retries must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load a config from a JSON file. Missing keys take their defaults.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from `XP_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup over the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("XP_DATA_FILE") {
            config.data_path = PathBuf::from(path);
        }
        override_parsed(&lookup, "XP_BASE", &mut config.base_experience)?;
        override_parsed(&lookup, "XP_EXPONENT", &mut config.level_exponent)?;
        override_parsed(
            &lookup,
            "XP_PRESTIGE_MULTIPLIER",
            &mut config.prestige_multiplier,
        )?;
        override_parsed(&lookup, "XP_LEVEL_CAP", &mut config.level_cap)?;
        override_parsed(&lookup, "XP_COOLDOWN_SECS", &mut config.cooldown_secs)?;
        override_parsed(&lookup, "XP_GRANT_MIN", &mut config.grant_min)?;
        override_parsed(&lookup, "XP_GRANT_MAX", &mut config.grant_max)?;
        override_parsed(&lookup, "XP_LEADERBOARD_SIZE", &mut config.leaderboard_size)?;
        override_parsed(&lookup, "XP_SAVE_RETRIES", &mut config.save_retries)?;
        override_parsed(&lookup, "XP_RETRY_BACKOFF_MS", &mut config.retry_backoff_ms)?;

        config.validate()?;
        Ok(config)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}
