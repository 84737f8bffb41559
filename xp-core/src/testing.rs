//! Testing utilities for the progression engine.
//!
//! This module provides deterministic building blocks for tests:
//! - `TestClock` for reproducible cooldown timestamps
//! - `fixed_grant_config` so activity grants have a known size
//! - `records` for building record maps from literals

use crate::cache::Records;
use crate::config::ProgressionConfig;
use crate::record::{ProgressionRecord, UserId};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// A clock anchored at a fixed instant, addressed in whole seconds.
#[derive(Debug, Clone, Copy)]
pub struct TestClock {
    origin: Instant,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// The instant `secs` seconds after the origin.
    pub fn at(&self, secs: u64) -> Instant {
        self.origin + Duration::from_secs(secs)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Default config with every activity granting exactly `amount`.
pub fn fixed_grant_config(data_path: impl Into<PathBuf>, amount: u64) -> ProgressionConfig {
    ProgressionConfig::new(data_path)
        .with_grant_range(amount, amount)
        .with_retry(3, Duration::from_millis(1))
}

/// Build a record map from `(user, experience, level, prestige)` tuples.
pub fn records(rows: &[(&str, u64, u32, u32)]) -> Records {
    rows.iter()
        .map(|&(user, experience, level, prestige)| {
            (
                UserId::from(user),
                ProgressionRecord::new(experience, level, prestige),
            )
        })
        .collect()
}
