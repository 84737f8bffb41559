//! ProgressionService - the public entry point of the engine.
//!
//! The service owns the cooldown gate, the in-memory cache and the store,
//! and wires them together:
//! - activity events pass the cooldown gate, draw a random grant and run
//!   it through the leveling engine
//! - results land in the cache immediately and a save is queued for the
//!   background writer
//! - admin grants and resets save synchronously and report failures
//! - level-ups and prestiges are returned to the caller and published to
//!   subscribers
//!
//! Lifecycle is `init` (load) → serve → `shutdown` (flush).

use crate::cache::{LeaderboardEntry, ProgressionCache, Records};
use crate::config::{ConfigError, ProgressionConfig};
use crate::cooldown::CooldownGate;
use crate::persist::{PersistError, ProgressionStore};
use crate::record::{ProgressionRecord, UserId};
use crate::rules::{Advancement, LevelingEngine, ProgressionEvent};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cooldown entries kept before stale ones are swept.
const COOLDOWN_SWEEP_THRESHOLD: usize = 1024;

/// Buffered notifications per subscriber before it starts lagging.
const NOTIFICATION_CAPACITY: usize = 256;

/// Errors from ProgressionService operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Experience amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("User id must not be empty")]
    InvalidUser,

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Progression service has shut down")]
    ShutDown,
}

/// A level-up or prestige to announce to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelNotification {
    pub user: UserId,
    pub new_level: u32,
    pub new_prestige: u32,

    /// Every transition caused by the grant, in order.
    pub events: Vec<ProgressionEvent>,
}

impl LevelNotification {
    fn from_advancement(user: &UserId, advancement: &Advancement) -> Option<Self> {
        advancement.has_transitions().then(|| Self {
            user: user.clone(),
            new_level: advancement.record.level,
            new_prestige: advancement.record.prestige,
            events: advancement.events.clone(),
        })
    }
}

/// Result of a single experience grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOutcome {
    pub user: UserId,

    /// Experience granted.
    pub amount: u64,

    /// The user's record after the grant.
    pub record: ProgressionRecord,

    /// Present when the grant caused a level-up or prestige.
    pub notification: Option<LevelNotification>,
}

/// Result of an activity event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// The user was granted experience too recently.
    OnCooldown { remaining: Duration },

    /// Experience was granted.
    Granted(GrantOutcome),
}

impl ActivityOutcome {
    pub fn granted(&self) -> Option<&GrantOutcome> {
        match self {
            ActivityOutcome::Granted(grant) => Some(grant),
            ActivityOutcome::OnCooldown { .. } => None,
        }
    }
}

/// A record together with how far it is from its next transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub record: ProgressionRecord,

    /// Threshold for the current level and prestige.
    pub required: u64,

    /// Experience still missing to reach the threshold.
    pub remaining: u64,
}

/// Draw an activity grant from `range`.
pub fn roll_grant<R: Rng>(rng: &mut R, range: RangeInclusive<u64>) -> u64 {
    rng.gen_range(range)
}

struct Shared {
    config: ProgressionConfig,
    engine: LevelingEngine,
    cooldowns: CooldownGate,
    cache: RwLock<ProgressionCache>,
    store: ProgressionStore,
    notifications: broadcast::Sender<LevelNotification>,
}

impl Shared {
    /// Save the current cache, snapshotting under the store's write lock.
    async fn persist(&self) -> Result<(), PersistError> {
        let cache = &self.cache;
        self.store
            .save_latest(move || async move { cache.read().await.snapshot() })
            .await
    }
}

struct Writer {
    queue: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Drains save requests one at a time. Requests that arrive while a save
/// is queued are coalesced into it, since every save writes the full cache.
async fn run_writer(shared: Arc<Shared>, mut queue: mpsc::Receiver<()>) {
    while queue.recv().await.is_some() {
        if let Err(e) = shared.persist().await {
            warn!(error = %e, "background save failed, records stay in memory until the next save");
        }
    }
    debug!("progression writer stopped");
}

/// Experience and leveling service.
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct ProgressionService {
    shared: Arc<Shared>,
    writer: Mutex<Option<Writer>>,
}

impl ProgressionService {
    /// Validate `config`, load persisted records and start the background
    /// writer. Must be called from within a tokio runtime.
    pub async fn init(config: ProgressionConfig) -> Result<Self, ServiceError> {
        let engine = config.engine();
        Self::init_with_engine(config, engine).await
    }

    /// Like [`init`](Self::init), leveling with `engine` instead of the
    /// curve and cap described by `config`.
    pub async fn init_with_engine(
        config: ProgressionConfig,
        engine: LevelingEngine,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let store = ProgressionStore::new(&config.data_path).with_retry(config.retry_policy());
        let records = store.load().await?;

        let (cache, corrected) = ProgressionCache::from_records(records, &engine);
        for user in &corrected {
            warn!(user = %user, "normalized out-of-range progression record");
        }
        info!(
            path = %store.path().display(),
            users = cache.len(),
            "progression records loaded"
        );

        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(Shared {
            cooldowns: CooldownGate::new(config.cooldown()),
            engine,
            cache: RwLock::new(cache),
            store,
            notifications,
            config,
        });

        let (queue, rx) = mpsc::channel(1);
        let task = tokio::spawn(run_writer(Arc::clone(&shared), rx));

        let service = Self {
            shared,
            writer: Mutex::new(Some(Writer { queue, task })),
        };

        if !corrected.is_empty() {
            service.request_save();
        }

        Ok(service)
    }

    pub fn config(&self) -> &ProgressionConfig {
        &self.shared.config
    }

    pub fn engine(&self) -> &LevelingEngine {
        &self.shared.engine
    }

    /// Receive level-up and prestige notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LevelNotification> {
        self.shared.notifications.subscribe()
    }

    /// True until `shutdown` has been called.
    pub fn is_running(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Handle a message or other activity from `user` at `now`.
    ///
    /// Grants a random amount within the configured range unless the user
    /// is on cooldown. The cache is updated immediately; persistence
    /// happens in the background.
    pub async fn on_activity(
        &self,
        user: &UserId,
        now: Instant,
    ) -> Result<ActivityOutcome, ServiceError> {
        let amount = roll_grant(&mut rand::thread_rng(), self.shared.config.grant_range());
        self.apply_activity(user, now, amount).await
    }

    /// Like [`on_activity`](Self::on_activity), drawing the grant from `rng`.
    pub async fn on_activity_with_rng<R: Rng>(
        &self,
        user: &UserId,
        now: Instant,
        rng: &mut R,
    ) -> Result<ActivityOutcome, ServiceError> {
        let amount = roll_grant(rng, self.shared.config.grant_range());
        self.apply_activity(user, now, amount).await
    }

    async fn apply_activity(
        &self,
        user: &UserId,
        now: Instant,
        amount: u64,
    ) -> Result<ActivityOutcome, ServiceError> {
        ensure_user(user)?;

        let cooldowns = &self.shared.cooldowns;
        if !cooldowns.admit(user, now) {
            debug!(user = %user, "activity ignored, user on cooldown");
            let remaining = cooldowns.remaining(user, now).unwrap_or_default();
            return Ok(ActivityOutcome::OnCooldown { remaining });
        }
        if let Some(evicted) = cooldowns.sweep_if_due(now, COOLDOWN_SWEEP_THRESHOLD) {
            debug!(evicted, "swept stale cooldown entries");
        }

        let outcome = self.grant(user, amount).await;
        self.request_save();
        Ok(ActivityOutcome::Granted(outcome))
    }

    /// Grant `amount` experience to `user` on behalf of `caller`.
    ///
    /// Bypasses the cooldown and saves before returning; a failed save is
    /// reported even though the cache already holds the new record.
    pub async fn grant_experience(
        &self,
        caller: &UserId,
        user: &UserId,
        amount: i64,
    ) -> Result<GrantOutcome, ServiceError> {
        ensure_user(user)?;
        let amount = u64::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or(ServiceError::InvalidAmount(amount))?;
        self.ensure_running()?;

        let outcome = self.grant(user, amount).await;
        info!(caller = %caller, user = %user, amount, "experience granted by admin");

        self.shared.persist().await?;
        Ok(outcome)
    }

    /// Current record of `user`, created with defaults when absent.
    ///
    /// Creating the default does not trigger a save.
    pub async fn query_progress(&self, user: &UserId) -> Result<ProgressionRecord, ServiceError> {
        ensure_user(user)?;

        if let Some(record) = self.shared.cache.read().await.get(user) {
            return Ok(*record);
        }
        Ok(self.shared.cache.write().await.get_or_create(user))
    }

    /// Current record of `user` along with its next threshold.
    pub async fn progress_report(&self, user: &UserId) -> Result<ProgressReport, ServiceError> {
        let record = self.query_progress(user).await?;
        let required = self.shared.engine.required_for(&record);
        Ok(ProgressReport {
            record,
            required,
            remaining: required.saturating_sub(record.experience),
        })
    }

    /// Reset `user` to the default record on behalf of `caller` and save.
    ///
    /// Succeeds for users without a record. Returns the previous record.
    pub async fn reset_progress(
        &self,
        caller: &UserId,
        user: &UserId,
    ) -> Result<Option<ProgressionRecord>, ServiceError> {
        ensure_user(user)?;
        self.ensure_running()?;

        let previous = self.shared.cache.write().await.reset(user);
        info!(
            caller = %caller,
            user = %user,
            previous = ?previous,
            "progression reset by admin"
        );

        self.shared.persist().await?;
        Ok(previous)
    }

    /// Top `limit` users by prestige, level and experience.
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.shared.cache.read().await.ranked(limit)
    }

    /// Leaderboard with the configured page size.
    pub async fn leaderboard_page(&self) -> Vec<LeaderboardEntry> {
        self.leaderboard(self.shared.config.leaderboard_size).await
    }

    /// Number of users with a record.
    pub async fn user_count(&self) -> usize {
        self.shared.cache.read().await.len()
    }

    /// Copy of every record currently held in memory.
    pub async fn snapshot(&self) -> Records {
        self.shared.cache.read().await.snapshot()
    }

    /// Save the cache now and wait for the write to finish.
    pub async fn flush(&self) -> Result<(), ServiceError> {
        self.shared.persist().await?;
        Ok(())
    }

    /// Stop the background writer, wait for queued saves and write a final
    /// snapshot. Calling it again only repeats the final save.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(Writer { queue, task }) = writer {
            drop(queue);
            if let Err(e) = task.await {
                warn!(error = %e, "progression writer ended abnormally");
            }
        }

        self.shared.persist().await?;
        info!(
            users = self.shared.cache.read().await.len(),
            "progression service shut down"
        );
        Ok(())
    }

    async fn grant(&self, user: &UserId, amount: u64) -> GrantOutcome {
        let advancement = {
            let mut cache = self.shared.cache.write().await;
            let current = cache.get_or_create(user);
            let advancement = self.shared.engine.apply_gain(current, amount);
            cache.apply(user, &advancement);
            advancement
        };

        let notification = LevelNotification::from_advancement(user, &advancement);
        if let Some(ref notification) = notification {
            info!(
                user = %user,
                level = notification.new_level,
                prestige = notification.new_prestige,
                "user advanced"
            );
            // No subscribers is fine
            let _ = self.shared.notifications.send(notification.clone());
        }

        GrantOutcome {
            user: user.clone(),
            amount,
            record: advancement.record,
            notification,
        }
    }

    /// Queue a background save. A save already waiting in the queue will
    /// pick up this change, so a full queue is not an error.
    fn request_save(&self) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match writer.as_ref().map(|w| w.queue.try_send(())) {
            Some(Ok(())) => {}
            Some(Err(TrySendError::Full(()))) => debug!("save already queued"),
            Some(Err(TrySendError::Closed(()))) => {
                warn!("progression writer is gone, change kept in memory only")
            }
            None => debug!("service shut down, change kept in memory only"),
        }
    }

    fn ensure_running(&self) -> Result<(), ServiceError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ServiceError::ShutDown)
        }
    }
}

fn ensure_user(user: &UserId) -> Result<(), ServiceError> {
    if user.is_blank() {
        Err(ServiceError::InvalidUser)
    } else {
        Ok(())
    }
}
