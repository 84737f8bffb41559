//! Experience thresholds.
//!
//! The curve is the single tuning point of the leveling rules: swapping it
//! changes how fast users progress without touching the engine or the
//! service.

use serde::{Deserialize, Serialize};

/// Experience needed to leave a given level at a given prestige.
pub trait ExperienceCurve: Send + Sync {
    /// Threshold for `level` at `prestige`. Must be at least 1.
    fn required_experience(&self, level: u32, prestige: u32) -> u64;
}

impl<F> ExperienceCurve for F
where
    F: Fn(u32, u32) -> u64 + Send + Sync,
{
    fn required_experience(&self, level: u32, prestige: u32) -> u64 {
        self(level, prestige).max(1)
    }
}

/// `base * level^exponent * prestige_multiplier^prestige`, rounded to the
/// nearest integer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerCurve {
    pub base: f64,
    pub exponent: f64,
    pub prestige_multiplier: f64,
}

impl PowerCurve {
    pub fn new(base: f64, exponent: f64, prestige_multiplier: f64) -> Self {
        Self {
            base,
            exponent,
            prestige_multiplier,
        }
    }
}

impl Default for PowerCurve {
    fn default() -> Self {
        Self::new(100.0, 2.0, 1.3)
    }
}

impl ExperienceCurve for PowerCurve {
    fn required_experience(&self, level: u32, prestige: u32) -> u64 {
        let raw = self.base
            * f64::from(level).powf(self.exponent)
            * self.prestige_multiplier.powi(prestige.min(i32::MAX as u32) as i32);

        // `as` saturates: NaN becomes 0 and infinity becomes u64::MAX.
        (raw.round() as u64).max(1)
    }
}
