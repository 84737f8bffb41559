//! Experience, leveling and prestige engine.
//!
//! This crate provides:
//! - A pure leveling engine with a pluggable experience curve
//! - A per-user cooldown gate for activity-driven grants
//! - An in-memory record cache mirrored to a JSON document
//! - A service that ties them together under concurrent access
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Instant;
//! use xp_core::{ProgressionConfig, ProgressionService, UserId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ProgressionService::init(ProgressionConfig::new("xp_data.json")).await?;
//!
//!     let outcome = service.on_activity(&UserId::from(1234u64), Instant::now()).await?;
//!     if let Some(notification) = outcome.granted().and_then(|g| g.notification.as_ref()) {
//!         println!("{} reached level {}", notification.user, notification.new_level);
//!     }
//!
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod cooldown;
pub mod curve;
pub mod persist;
pub mod record;
pub mod rules;
pub mod service;
pub mod testing;

// Primary public API
pub use cache::{LeaderboardEntry, ProgressionCache, Records};
pub use config::{ConfigError, ProgressionConfig};
pub use cooldown::CooldownGate;
pub use curve::{ExperienceCurve, PowerCurve};
pub use persist::{PersistError, ProgressionStore, RetryPolicy};
pub use record::{ProgressionRecord, UserId};
pub use rules::{Advancement, LevelingEngine, ProgressionEvent};
pub use service::{
    ActivityOutcome, GrantOutcome, LevelNotification, ProgressReport, ProgressionService,
    ServiceError,
};
