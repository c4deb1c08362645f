//! In-process store backend with TTL expiry and opportunistic sweeping.
//!
//! A single mutex over the entry map serializes every mutation, which is
//! what makes `increment_or_init` and `update` atomic per key. Expired
//! entries are reclaimed on access and by a periodic sweep that runs every
//! `SWEEP_EVERY` mutations; neither ever lets an expired value leak into a
//! read.

use crate::clock::Clock;
use crate::store::{EphemeralStore, UpdateFn};
use crate::GateError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mutations between opportunistic sweeps of expired entries.
const SWEEP_EVERY: u64 = 512;

struct Entry {
    payload: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    // Live through the expiry instant itself, absent one tick later.
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at >= now
    }
}

/// In-memory [`EphemeralStore`] implementation.
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    mutations: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store reading time from the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            mutations: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, GateError> {
        self.entries
            .lock()
            .map_err(|_| GateError::StoreUnavailable("ephemeral store lock poisoned".to_string()))
    }

    fn expires(&self, ttl: Duration) -> Result<DateTime<Utc>, GateError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| GateError::StoreUnavailable("TTL out of range".to_string()))?;
        Ok(self.clock.now_utc() + ttl)
    }

    /// Sweep expired entries every `SWEEP_EVERY` mutations. The caller
    /// already holds the lock; the sweep never blocks the request path
    /// beyond that.
    fn maybe_sweep(&self, entries: &mut HashMap<String, Entry>) {
        if self.mutations.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let now = self.clock.now_utc();
            entries.retain(|_, entry| entry.is_live(now));
        }
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

impl EphemeralStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, GateError> {
        let mut entries = self.lock()?;
        let now = self.clock.now_utc();

        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.payload.clone())),
            Some(_) => {
                // On-access reclaim of an expired entry.
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GateError> {
        let expires_at = self.expires(ttl)?;
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                payload: value.to_string(),
                expires_at,
            },
        );
        self.maybe_sweep(&mut entries);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), GateError> {
        let mut entries = self.lock()?;
        entries.remove(key);
        self.maybe_sweep(&mut entries);
        Ok(())
    }

    fn increment_or_init(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, GateError> {
        let fresh_expiry = self.expires(ttl)?;
        let mut entries = self.lock()?;
        let now = self.clock.now_utc();

        let (value, expires_at) = match entries.get(key) {
            Some(entry) if entry.is_live(now) => {
                // A live counter keeps its window; a non-numeric payload is
                // replaced rather than corrupting every later increment.
                let current: i64 = entry.payload.parse().unwrap_or(0);
                (current + delta, entry.expires_at)
            }
            _ => (delta, fresh_expiry),
        };

        entries.insert(
            key.to_string(),
            Entry {
                payload: value.to_string(),
                expires_at,
            },
        );
        self.maybe_sweep(&mut entries);
        Ok(value)
    }

    fn update(&self, key: &str, ttl: Duration, apply: &mut UpdateFn<'_>) -> Result<(), GateError> {
        let fresh_expiry = self.expires(ttl)?;
        let mut entries = self.lock()?;
        let now = self.clock.now_utc();

        let live = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.payload.clone());

        match apply(live.as_deref()) {
            Some(next) => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        payload: next,
                        expires_at: fresh_expiry,
                    },
                );
            }
            None => {
                if live.is_none() {
                    // Drop a physically present but expired entry.
                    entries.remove(key);
                }
            }
        }
        self.maybe_sweep(&mut entries);
        Ok(())
    }
}
