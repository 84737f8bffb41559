//! In-memory progression state.
//!
//! The cache is authoritative while the process runs; the on-disk document
//! only mirrors it. Records change through engine advancements or a full
//! reset, never through direct field edits.

use crate::record::{ProgressionRecord, UserId};
use crate::rules::{Advancement, LevelingEngine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full user to record mapping, as persisted.
pub type Records = BTreeMap<UserId, ProgressionRecord>;

/// One row of a leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub user: UserId,
    pub record: ProgressionRecord,
}

/// User records held in memory.
#[derive(Debug, Clone, Default)]
pub struct ProgressionCache {
    records: Records,
}

impl ProgressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache from loaded records, settling any that break the
    /// engine's rules. Returns the cache and the users that were corrected.
    pub fn from_records(records: Records, engine: &LevelingEngine) -> (Self, Vec<UserId>) {
        let mut corrected = Vec::new();
        let records = records
            .into_iter()
            .map(|(user, record)| {
                let (fixed, changed) = engine.normalize(record);
                if changed {
                    corrected.push(user.clone());
                }
                (user, fixed)
            })
            .collect();

        (Self { records }, corrected)
    }

    pub fn get(&self, user: &UserId) -> Option<&ProgressionRecord> {
        self.records.get(user)
    }

    /// Current record for `user`, inserting the default when absent.
    pub fn get_or_create(&mut self, user: &UserId) -> ProgressionRecord {
        *self.records.entry(user.clone()).or_default()
    }

    /// Store the outcome of an engine computation for `user`.
    pub fn apply(&mut self, user: &UserId, advancement: &Advancement) {
        self.records.insert(user.clone(), advancement.record);
    }

    /// Reinitialize `user` to the default record. Returns the prior record,
    /// if any.
    pub fn reset(&mut self, user: &UserId) -> Option<ProgressionRecord> {
        self.records
            .insert(user.clone(), ProgressionRecord::default())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of every record for persistence.
    pub fn snapshot(&self) -> Records {
        self.records.clone()
    }

    /// Top `limit` users by prestige, then level, then experience, all
    /// descending. Ties keep ascending user id order.
    pub fn ranked(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut rows: Vec<(&UserId, &ProgressionRecord)> = self.records.iter().collect();
        rows.sort_by(|a, b| b.1.rank_key().cmp(&a.1.rank_key()));

        rows.into_iter()
            .take(limit)
            .enumerate()
            .map(|(idx, (user, record))| LeaderboardEntry {
                rank: idx + 1,
                user: user.clone(),
                record: *record,
            })
            .collect()
    }
}
