//! Ephemeral key-value store with per-entry expiry.
//!
//! The shared substrate for sessions, rate-limit counters, quota reset
//! markers and token records. Implementations must treat entries past their
//! TTL as absent on read, and must serialize `increment_or_init` and
//! `update` per store so concurrent counter mutations never lose updates.

pub mod memory;

use crate::GateError;
use std::time::Duration;

/// Atomic read-modify-write closure.
///
/// Receives the current live value (`None` if the key is absent or expired)
/// and returns `Some(new)` to write the new value with a fresh TTL, or
/// `None` to leave the entry untouched (used by the rate limiter so a
/// denial never increments the counter).
pub type UpdateFn<'a> = dyn FnMut(Option<&str>) -> Option<String> + 'a;

/// Key-value cache with per-entry time-to-live.
///
/// Injected into every component that needs ephemeral state; there is no
/// process-global store.
pub trait EphemeralStore: Send + Sync {
    /// Read a value. Entries past their TTL behave as absent.
    fn get(&self, key: &str) -> Result<Option<String>, GateError>;

    /// Write a value, replacing any previous value and TTL atomically.
    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError>;

    /// Remove a value. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), GateError>;

    /// Atomically add `delta` to a numeric counter, initializing it to
    /// `delta` with the given TTL when absent or expired. A live entry
    /// keeps its original expiry. Returns the new value.
    fn increment_or_init(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, GateError>;

    /// Apply a serialized read-modify-write to one key. See [`UpdateFn`].
    fn update(&self, key: &str, ttl: Duration, apply: &mut UpdateFn<'_>) -> Result<(), GateError>;
}

/// Cache key construction, one place so namespaces never collide.
pub mod keys {
    /// Session record, keyed by session id.
    pub fn session(session_id: &str) -> String {
        format!("session:{}", session_id)
    }

    /// Last-activity marker, keyed by user id.
    pub fn activity(user_id: &str) -> String {
        format!("activity:{}", user_id)
    }

    /// Rate-limit window counter, keyed by request signature.
    pub fn rate(signature: &str) -> String {
        format!("rate:{}", signature)
    }

    /// Daily quota reset marker, keyed by subscription id.
    pub fn daily_reset(subscription_id: &str) -> String {
        format!("quota:daily:{}", subscription_id)
    }

    /// Minted download token record, keyed by opaque token id.
    pub fn token(token: &str) -> String {
        format!("token:{}", token)
    }

    /// Preserved original URL for post-login resume.
    pub fn intended(client_key: &str) -> String {
        format!("intended:{}", client_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(keys::session("abc"), "session:abc");
        assert_eq!(keys::activity("u1"), "activity:u1");
        assert_eq!(keys::rate("deadbeef"), "rate:deadbeef");
        assert_eq!(keys::daily_reset("sub-1"), "quota:daily:sub-1");
        assert_eq!(keys::token("t0"), "token:t0");
        assert_eq!(keys::intended("u1"), "intended:u1");
    }
}
