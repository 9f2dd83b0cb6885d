//! Per-(bundle, client) unlock attempt limiter.
//!
//! Each key moves between two states:
//!
//! ```text
//! Open{attempts} ──max attempts inside the last window──▶ Blocked{until}
//!        ▲                                                     │
//!        └─────────────────── until passed ────────────────────┘
//! ```
//!
//! The window slides: an `Open` key remembers the instant of every attempt
//! still inside `window` and forgets each one as it ages out.
//!
//! Check-and-increment is one critical section per call, so concurrent
//! attempts on the same key can never admit more than `max_attempts`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dropseal_core::config::UnlockConfig;
use dropseal_core::{DropsealError, DropsealResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(600),
            cooldown: Duration::from_secs(600),
        }
    }
}

impl RateLimitPolicy {
    pub fn from_config(cfg: &UnlockConfig) -> DropsealResult<Self> {
        let policy = Self {
            max_attempts: cfg.max_attempts,
            window: Duration::from_secs(cfg.window_secs),
            cooldown: Duration::from_secs(cfg.cooldown_secs),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> DropsealResult<()> {
        if self.max_attempts == 0 {
            return Err(DropsealError::Config("unlock.max_attempts must be at least 1".into()));
        }
        if self.window.is_zero() || self.cooldown.is_zero() {
            return Err(DropsealError::Config(
                "unlock.window_secs and unlock.cooldown_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Attempts are counted per bundle and per client identity (IP, session).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    pub bundle_id: String,
    pub client: String,
}

impl AttemptKey {
    pub fn new(bundle_id: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            client: client.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Attempt admitted; `remaining` further attempts fit in this window.
    Allowed { remaining: u32 },
    /// Refused; try again after `retry_after` (always non-zero).
    Blocked { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    /// `Ok` when allowed, [`DropsealError::RateLimited`] when blocked.
    pub fn into_result(self) -> DropsealResult<u32> {
        match self {
            Decision::Allowed { remaining } => Ok(remaining),
            Decision::Blocked { retry_after } => Err(DropsealError::RateLimited { retry_after }),
        }
    }
}

/// Storage contract for attempt counters. Implementations must make
/// `check_and_increment` atomic per key.
pub trait AttemptStore: Send + Sync {
    fn check_and_increment(&self, key: &AttemptKey, now: Instant) -> Decision;

    /// Forget a key after a successful unlock.
    fn reset(&self, key: &AttemptKey);

    /// Drop state that no longer affects any decision. Returns entries removed.
    fn evict_expired(&self, now: Instant) -> usize;
}

#[derive(Debug, Clone)]
enum AttemptState {
    /// Instants of the attempts inside the current window, oldest first.
    Open { attempts: VecDeque<Instant> },
    Blocked { until: Instant },
}

/// In-process attempt store behind a mutex.
#[derive(Debug)]
pub struct MemoryAttemptStore {
    policy: RateLimitPolicy,
    entries: Mutex<HashMap<AttemptKey, AttemptState>>,
}

impl MemoryAttemptStore {
    pub fn new(policy: RateLimitPolicy) -> Self {
        MemoryAttemptStore {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Nothing panics between the remove and the insert of one update, so a
    // poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<AttemptKey, AttemptState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn check_and_increment(&self, key: &AttemptKey, now: Instant) -> Decision {
        let policy = self.policy;
        let mut map = self.lock();
        let mut attempts = match map.remove(key) {
            Some(AttemptState::Blocked { until }) if now < until => {
                map.insert(key.clone(), AttemptState::Blocked { until });
                return Decision::Blocked {
                    retry_after: until - now,
                };
            }
            Some(AttemptState::Open { attempts }) => attempts,
            Some(AttemptState::Blocked { .. }) | None => VecDeque::new(),
        };

        while attempts
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= policy.window)
        {
            attempts.pop_front();
        }

        let (next, decision) = if attempts.len() < policy.max_attempts as usize {
            attempts.push_back(now);
            let remaining = policy.max_attempts - attempts.len() as u32;
            (AttemptState::Open { attempts }, Decision::Allowed { remaining })
        } else {
            (
                AttemptState::Blocked {
                    until: now + policy.cooldown,
                },
                Decision::Blocked {
                    retry_after: policy.cooldown,
                },
            )
        };
        map.insert(key.clone(), next);
        decision
    }

    fn reset(&self, key: &AttemptKey) {
        self.lock().remove(key);
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let window = self.policy.window;
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, state| match state {
            AttemptState::Open { attempts } => attempts
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window),
            AttemptState::Blocked { until } => now < *until,
        });
        before - map.len()
    }
}
