//! Rate-Limit Coordinator: process-wide per-provider wait/release state,
//! keyed by provider (not by agent) so that two agents sharing an
//! upstream quota block together.
//!
//! Grounded on `router::circuit_breaker::CircuitBreaker`
//! (per-key shared state behind an `RwLock`, a trip count, a reset
//! deadline) generalized from "open/half-open/closed" to the spec's
//! simpler "limited with a reset deadline" model, and on
//! `resilience`'s jittered-backoff helper for the `jitter_factor`
//! computation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{RavenError, RavenResult};
use crate::events::{Event, EventBus, EventKind};

/// In-memory per-provider rate-limit state (§3 ProviderState).
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub is_limited: bool,
    pub reset_at: Option<DateTime<Utc>>,
    pub wait_count: u32,
    pub last_message: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for ProviderState {
    fn default() -> Self {
        Self {
            is_limited: false,
            reset_at: None,
            wait_count: 0,
            last_message: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Backoff policy (§4.2 config).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub default_wait: Duration,
    pub max_waits: u32,
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(60),
            max_waits: 5,
            jitter_factor: 0.10,
        }
    }
}

/// A callback invoked whenever a provider is newly recorded as limited.
/// Fired *outside* the coordinator's lock (§4.2, §5) to avoid
/// callback-into-coordinator re-entry deadlock.
pub type RateLimitCallback = Arc<dyn Fn(&str, Duration) + Send + Sync>;

pub struct RateLimitCoordinator {
    policy: BackoffPolicy,
    state: RwLock<HashMap<String, ProviderState>>,
    on_limited: Option<RateLimitCallback>,
}

impl RateLimitCoordinator {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: RwLock::new(HashMap::new()),
            on_limited: None,
        }
    }

    pub fn with_callback(mut self, callback: RateLimitCallback) -> Self {
        self.on_limited = Some(callback);
        self
    }

    /// Record that `provider` is limited. Applies jitter to
    /// `reset_after` (or `default_wait` when `reset_after` is zero),
    /// increments `wait_count`, and fires the callback (if any) after
    /// releasing the lock.
    pub fn record(&self, provider: &str, reset_after: Duration, message: &str) {
        let wait = self.jittered_wait(reset_after);
        let reset_at = Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default();

        let callback = {
            let mut map = self.state.write().expect("rate-limit state poisoned");
            let entry = map.entry(provider.to_string()).or_default();
            entry.is_limited = true;
            entry.reset_at = Some(reset_at);
            entry.wait_count += 1;
            entry.last_message = message.to_string();
            entry.updated_at = Utc::now();
            self.on_limited.clone()
        };

        if let Some(callback) = callback {
            callback(provider, wait);
        }
    }

    /// Reset `provider` to not-limited, `wait_count` back to zero.
    pub fn clear(&self, provider: &str) {
        let mut map = self.state.write().expect("rate-limit state poisoned");
        let entry = map.entry(provider.to_string()).or_default();
        entry.is_limited = false;
        entry.reset_at = None;
        entry.wait_count = 0;
        entry.updated_at = Utc::now();
    }

    /// Remaining wait for `provider`: zero if not limited or already past
    /// `reset_at`.
    pub fn should_wait(&self, provider: &str) -> Duration {
        let map = self.state.read().expect("rate-limit state poisoned");
        let Some(entry) = map.get(provider) else {
            return Duration::ZERO;
        };
        if !entry.is_limited {
            return Duration::ZERO;
        }
        let Some(reset_at) = entry.reset_at else {
            return Duration::ZERO;
        };
        let remaining = reset_at - Utc::now();
        remaining.to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_limited(&self, provider: &str) -> bool {
        self.should_wait(provider) > Duration::ZERO
    }

    pub fn exceeded_max_waits(&self, provider: &str) -> bool {
        let map = self.state.read().expect("rate-limit state poisoned");
        map.get(provider)
            .map(|e| e.wait_count >= self.policy.max_waits)
            .unwrap_or(false)
    }

    pub fn snapshot(&self, provider: &str) -> ProviderState {
        let map = self.state.read().expect("rate-limit state poisoned");
        map.get(provider).cloned().unwrap_or_default()
    }

    /// Block until `provider`'s reset deadline passes (or cancellation),
    /// emitting a per-second countdown event on `events` (if supplied).
    pub async fn wait_for_reset(
        &self,
        cancel: &CancellationToken,
        provider: &str,
        run_id: &str,
        events: Option<&EventBus>,
    ) -> RavenResult<()> {
        loop {
            let remaining = self.should_wait(provider);
            if remaining.is_zero() {
                return Ok(());
            }
            let tick = remaining.min(Duration::from_secs(1));
            if let Some(bus) = events {
                bus.emit(Event::new(
                    run_id,
                    EventKind::RateLimitWait {
                        provider: provider.to_string(),
                        remaining_secs: remaining.as_secs(),
                    },
                ));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(RavenError::Cancelled),
                _ = tokio::time::sleep(tick) => {}
            }
        }
    }

    fn jittered_wait(&self, parsed: Duration) -> Duration {
        let base = if parsed.is_zero() {
            self.policy.default_wait
        } else {
            parsed
        };
        let jitter = self.policy.jitter_factor.clamp(0.0, 1.0);
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
    }
}

impl Default for RateLimitCoordinator {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
