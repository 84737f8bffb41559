//! Per-user rate limiting of experience grants.
//!
//! Entries live in memory only. A restart forgets every cooldown, which
//! simply lets each user earn again on their next message.

use crate::record::UserId;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default minimum time between two grants to the same user.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct GateState {
    last_granted: HashMap<UserId, Instant>,
    last_sweep: Option<Instant>,
}

/// Admits at most one grant per user per window.
#[derive(Debug)]
pub struct CooldownGate {
    window: Duration,
    state: Mutex<GateState>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit a grant for `user` at `now`.
    ///
    /// Returns true and records `now` when the user has no prior grant or
    /// the window has fully elapsed. Otherwise returns false and leaves the
    /// recorded time untouched. A `now` earlier than the recorded time is
    /// treated as inside the window.
    pub fn admit(&self, user: &UserId, now: Instant) -> bool {
        let mut state = self.state();

        match state.last_granted.get(user) {
            Some(last) if now.saturating_duration_since(*last) < self.window => false,
            _ => {
                state.last_granted.insert(user.clone(), now);
                true
            }
        }
    }

    /// Time left before `user` can be granted again, if any.
    pub fn remaining(&self, user: &UserId, now: Instant) -> Option<Duration> {
        self.state().last_granted.get(user).and_then(|last| {
            let elapsed = now.saturating_duration_since(*last);
            self.window.checked_sub(elapsed).filter(|d| !d.is_zero())
        })
    }

    /// Drop entries whose window has elapsed. Returns how many were removed.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let mut state = self.state();
        self.sweep(&mut state, now)
    }

    /// Evict stale entries once more than `threshold` are held, at most
    /// once per window. Returns the number removed when a sweep ran.
    pub fn sweep_if_due(&self, now: Instant, threshold: usize) -> Option<usize> {
        let mut state = self.state();
        if state.last_granted.len() <= threshold {
            return None;
        }
        if let Some(last) = state.last_sweep {
            if now.saturating_duration_since(last) < self.window {
                return None;
            }
        }
        Some(self.sweep(&mut state, now))
    }

    fn sweep(&self, state: &mut GateState, now: Instant) -> usize {
        let before = state.last_granted.len();
        state
            .last_granted
            .retain(|_, last| now.saturating_duration_since(*last) < self.window);
        state.last_sweep = Some(now);
        before - state.last_granted.len()
    }

    pub fn len(&self) -> usize {
        self.state().last_granted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
