//! Per-user progression records and user identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a user in the progression system.
///
/// Chat platforms hand out numeric snowflakes, other callers use strings;
/// both are stored as their string form so the persisted document keys
/// stay uniform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is empty or only whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Experience, level and prestige of a single user.
///
/// Older documents wrote experience under the `xp` key and had no
/// prestige; both shapes deserialize into this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionRecord {
    /// Experience accumulated towards the next level.
    #[serde(alias = "xp")]
    pub experience: u64,

    /// Current level, starting at 1.
    pub level: u32,

    /// Number of completed prestige cycles.
    pub prestige: u32,
}

impl ProgressionRecord {
    pub const fn new(experience: u64, level: u32, prestige: u32) -> Self {
        Self {
            experience,
            level,
            prestige,
        }
    }

    /// Ranking key: prestige first, then level, then experience.
    pub fn rank_key(&self) -> (u32, u32, u64) {
        (self.prestige, self.level, self.experience)
    }
}

impl Default for ProgressionRecord {
    fn default() -> Self {
        Self::new(0, 1, 0)
    }
}

impl fmt::Display for ProgressionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "level {} (prestige {}), {} XP",
            self.level, self.prestige, self.experience
        )
    }
}
