//! Fixed-window rate limiting.
//!
//! Counters are keyed by a SHA-256 signature of (route identity, client IP,
//! authenticated-user-or-guest) and live in the ephemeral store. The window
//! is fixed, not sliding: a burst straddling a window boundary can see up
//! to twice the budget. That is a documented trade-off of the scheme, not
//! a bug — the counter resets wholesale when the window elapses.
//!
//! The whole read-check-increment runs inside one serialized store update,
//! so concurrent requests never lose an increment, and a denial leaves the
//! counter untouched.

use crate::clock::Clock;
use crate::store::{keys, EphemeralStore};
use crate::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// One signature's counter within the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowCounter {
    attempts: u32,
    window_reset_at: DateTime<Utc>,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    /// Under budget; `remaining` feeds client backoff headers.
    Allowed {
        /// The window's full budget.
        limit: u32,
        /// Requests left in this window after this one.
        remaining: u32,
    },
    /// Over budget; retry once the window resets.
    Denied {
        /// Seconds until the window resets.
        retry_after_secs: i64,
    },
}

impl RateDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Fixed-window rate limiter over the ephemeral store.
pub struct RateLimiter {
    store: Arc<dyn EphemeralStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter over the given store.
    pub fn new(store: Arc<dyn EphemeralStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check and count one request for the given identity.
    ///
    /// If the stored window has elapsed the counter restarts at zero with a
    /// fresh window of `decay_window` from now. At or over `max_attempts`
    /// the request is denied and the counter is NOT incremented; otherwise
    /// the attempt is counted and the remaining budget reported.
    pub fn allow(
        &self,
        route: &str,
        client_ip: &str,
        user_id: Option<&str>,
        max_attempts: u32,
        decay_window: Duration,
    ) -> Result<RateDecision, GateError> {
        let key = keys::rate(&signature(route, client_ip, user_id));
        let now = self.clock.now_utc();
        let window = chrono::Duration::from_std(decay_window)
            .map_err(|_| GateError::StoreUnavailable("decay window out of range".to_string()))?;

        let mut decision = None;
        self.store.update(&key, decay_window, &mut |current| {
            let mut counter = current
                .and_then(|raw| serde_json::from_str::<WindowCounter>(raw).ok())
                .filter(|counter| counter.window_reset_at > now)
                .unwrap_or(WindowCounter {
                    attempts: 0,
                    window_reset_at: now + window,
                });

            if counter.attempts >= max_attempts {
                let retry_after_secs = counter
                    .window_reset_at
                    .signed_duration_since(now)
                    .num_seconds()
                    .max(0);
                decision = Some(RateDecision::Denied { retry_after_secs });
                // Leave the counter untouched on denial.
                return None;
            }

            counter.attempts += 1;
            match serde_json::to_string(&counter) {
                Ok(raw) => {
                    decision = Some(RateDecision::Allowed {
                        limit: max_attempts,
                        remaining: max_attempts - counter.attempts,
                    });
                    Some(raw)
                }
                // An unencodable counter denies below rather than letting
                // the request through uncounted.
                Err(_) => None,
            }
        })?;

        decision.ok_or_else(|| GateError::StoreUnavailable("rate counter encode failed".to_string()))
    }
}

/// Stable counter key for a (route, client, user) identity.
///
/// Unauthenticated clients share the "guest" bucket per IP; authenticated
/// users are counted per user id so address churn cannot reset them.
pub fn signature(route: &str, client_ip: &str, user_id: Option<&str>) -> String {
    let identity = format!(
        "{}|{}|{}",
        route,
        client_ip,
        user_id.unwrap_or("guest")
    );
    hex::encode(Sha256::digest(identity.as_bytes()))
}
