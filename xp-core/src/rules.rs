//! Leveling rules: experience in, level-ups and prestige out.
//!
//! The engine is pure. It takes a record and a gain, and produces the new
//! record together with the events describing what changed:
//! 1. The gain is added to the record's experience
//! 2. While the experience meets the current threshold, the record either
//!    levels up (keeping the remainder) or, at the level cap, prestiges
//! 3. The caller applies the resulting record and renders the events
//!
//! Nothing here touches storage or clocks, so every rule can be tested with
//! literal inputs.

use crate::curve::{ExperienceCurve, PowerCurve};
use crate::record::ProgressionRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default maximum level before a prestige reset.
pub const DEFAULT_LEVEL_CAP: u32 = 50;

/// A transition produced while applying a gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressionEvent {
    /// The record reached a new level.
    LevelUp { new_level: u32 },

    /// The record hit the level cap and started a new prestige cycle.
    Prestige { new_prestige: u32 },
}

/// Result of applying a gain to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advancement {
    /// The record after the gain and every resulting transition.
    pub record: ProgressionRecord,

    /// Transitions in the order they happened.
    pub events: Vec<ProgressionEvent>,
}

impl Advancement {
    fn new(record: ProgressionRecord) -> Self {
        Self {
            record,
            events: Vec::new(),
        }
    }

    fn with_event(mut self, event: ProgressionEvent) -> Self {
        self.events.push(event);
        self
    }

    /// True when the gain caused at least one level-up or prestige.
    pub fn has_transitions(&self) -> bool {
        !self.events.is_empty()
    }

    pub fn level_ups(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ProgressionEvent::LevelUp { .. }))
            .count()
    }

    pub fn prestiged(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, ProgressionEvent::Prestige { .. }))
    }
}

/// Applies experience gains to records using a pluggable curve.
#[derive(Clone)]
pub struct LevelingEngine {
    curve: Arc<dyn ExperienceCurve>,
    level_cap: u32,
}

impl fmt::Debug for LevelingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevelingEngine")
            .field("level_cap", &self.level_cap)
            .finish_non_exhaustive()
    }
}

impl Default for LevelingEngine {
    fn default() -> Self {
        Self::new(PowerCurve::default(), DEFAULT_LEVEL_CAP)
    }
}

impl LevelingEngine {
    /// Create an engine. A cap of 0 is treated as 1.
    pub fn new(curve: impl ExperienceCurve + 'static, level_cap: u32) -> Self {
        Self {
            curve: Arc::new(curve),
            level_cap: level_cap.max(1),
        }
    }

    pub fn level_cap(&self) -> u32 {
        self.level_cap
    }

    /// Experience needed to leave `level` at `prestige`.
    pub fn required_experience(&self, level: u32, prestige: u32) -> u64 {
        self.curve.required_experience(level, prestige).max(1)
    }

    /// Experience needed for the record's next transition.
    pub fn required_for(&self, record: &ProgressionRecord) -> u64 {
        self.required_experience(record.level, record.prestige)
    }

    /// Add `amount` experience and resolve every resulting transition.
    ///
    /// Terminates for any amount: each level-up removes a positive
    /// threshold, and a prestige resets experience to zero. Excess
    /// experience at prestige time is discarded.
    pub fn apply_gain(&self, record: ProgressionRecord, amount: u64) -> Advancement {
        let mut advancement = Advancement::new(record);
        let mut current = record;
        current.experience = current.experience.saturating_add(amount);

        loop {
            let required = self.required_for(&current);
            if current.experience < required {
                break;
            }

            if current.level < self.level_cap {
                current.experience -= required;
                current.level += 1;
                advancement = advancement.with_event(ProgressionEvent::LevelUp {
                    new_level: current.level,
                });
            } else {
                current.experience = 0;
                current.level = 1;
                current.prestige = current.prestige.saturating_add(1);
                advancement = advancement.with_event(ProgressionEvent::Prestige {
                    new_prestige: current.prestige,
                });
            }
        }

        advancement.record = current;
        advancement
    }

    /// Bring a record loaded from outside the engine back within the
    /// rules: level at least 1, at most the cap, and experience below the
    /// current threshold. Returns the settled record and whether anything
    /// changed.
    pub fn normalize(&self, record: ProgressionRecord) -> (ProgressionRecord, bool) {
        let mut fixed = record;
        fixed.level = fixed.level.clamp(1, self.level_cap);
        let fixed = self.apply_gain(fixed, 0).record;
        (fixed, fixed != record)
    }
}
