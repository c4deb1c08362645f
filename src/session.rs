//! Session lifecycle: authentication, liveness, activity tracking and
//! account-status enforcement.
//!
//! A session lives in the ephemeral store under `session:<id>` with a TTL
//! equal to the inactivity timeout; every authenticated request re-caches
//! it (`touch`), so inactivity alone — not wall-clock session age — drives
//! expiry. Account status is re-read from the user directory on every
//! request: a suspension takes effect immediately, no matter how fresh the
//! session is.

use crate::clock::Clock;
use crate::directory::{AccountStatus, User, UserDirectory};
use crate::store::{keys, EphemeralStore};
use crate::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Authenticated session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Owning user id.
    pub user_id: String,
    /// Email at login time.
    pub email: String,
    /// Display name at login time.
    pub display_name: String,
    /// Role at login time.
    pub role: String,
    /// When the session was created.
    pub logged_in_at: DateTime<Utc>,
    /// Last authenticated request; liveness is measured from here.
    pub last_activity_at: DateTime<Utc>,
}

/// Result of a successful authentication.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    /// The session identity the client must present on later requests.
    pub session_id: String,
    /// The authenticated session, already touched.
    pub session: Session,
    /// Whether an existing session was resumed (false: freshly created
    /// from a remember credential).
    pub resumed: bool,
}

/// Session lifecycle manager.
pub struct SessionManager {
    store: Arc<dyn EphemeralStore>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl SessionManager {
    /// Create a manager enforcing the given inactivity timeout.
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            users,
            clock,
            timeout,
        }
    }

    /// Authenticate a request.
    ///
    /// Resolution order: (a) an existing valid session under the presented
    /// session id; (b) a remember credential matched against the user
    /// directory, provided the account is active — a match creates a new
    /// session. Either path leaves the session touched and re-cached.
    ///
    /// # Errors
    /// - `SessionExpired` — the presented session exceeded the inactivity
    ///   timeout and was destroyed
    /// - `AccountSuspended` — the owning account is no longer active
    /// - `Unauthenticated` — nothing usable was presented
    pub fn authenticate(
        &self,
        session_id: Option<&str>,
        remember_token: Option<&str>,
    ) -> Result<AuthOutcome, GateError> {
        if let Some(session_id) = session_id {
            if let Some(mut session) = self.load(session_id)? {
                self.enforce_account_status(session_id, &session)?;
                self.check_liveness(session_id, &session)?;
                self.touch(session_id, &mut session)?;
                return Ok(AuthOutcome {
                    session_id: session_id.to_string(),
                    session,
                    resumed: true,
                });
            }
        }

        if let Some(token) = remember_token {
            if let Some(user) = self.users.find_by_remember_token(token)? {
                if user.status != AccountStatus::Active {
                    tracing::warn!(user_id = %user.id, "remember login refused, account not active");
                    return Err(GateError::AccountSuspended);
                }
                return self.login(&user, token);
            }
        }

        Err(GateError::Unauthenticated)
    }

    /// Fail if the session exceeded the inactivity timeout.
    ///
    /// The boundary is strict: a session idle for exactly the timeout is
    /// still valid, one second longer is expired. Expiry destroys the
    /// session and its activity entry.
    pub fn check_liveness(&self, session_id: &str, session: &Session) -> Result<(), GateError> {
        let idle = self
            .clock
            .now_utc()
            .signed_duration_since(session.last_activity_at);
        let timeout = chrono::Duration::from_std(self.timeout)
            .map_err(|_| GateError::StoreUnavailable("timeout out of range".to_string()))?;

        if idle > timeout {
            self.destroy(session_id, &session.user_id)?;
            return Err(GateError::SessionExpired);
        }
        Ok(())
    }

    /// Record activity: refresh `last_activity_at` and re-cache the session
    /// and activity entries with a full timeout's TTL.
    ///
    /// Touches are last-write-wins; concurrent requests only ever move the
    /// timestamp forward within clock precision.
    pub fn touch(&self, session_id: &str, session: &mut Session) -> Result<(), GateError> {
        let now = self.clock.now_utc();
        session.last_activity_at = now;

        let payload = serde_json::to_string(session)
            .map_err(|e| GateError::StoreUnavailable(format!("session encode: {}", e)))?;
        self.store
            .put(&keys::session(session_id), &payload, self.timeout)?;
        self.store.put(
            &keys::activity(&session.user_id),
            &now.to_rfc3339(),
            self.timeout,
        )
    }

    /// Re-read the account's standing; anything but active forces logout.
    pub fn enforce_account_status(
        &self,
        session_id: &str,
        session: &Session,
    ) -> Result<(), GateError> {
        let user = self.users.find_by_id(&session.user_id)?;
        match user {
            Some(User {
                status: AccountStatus::Active,
                ..
            }) => Ok(()),
            Some(user) => {
                tracing::warn!(user_id = %user.id, status = ?user.status, "forcing logout, account not active");
                self.destroy(session_id, &session.user_id)?;
                Err(GateError::AccountSuspended)
            }
            None => {
                self.destroy(session_id, &session.user_id)?;
                Err(GateError::Unauthenticated)
            }
        }
    }

    /// Explicit logout: destroy the session and activity entries.
    pub fn logout(&self, session_id: &str, user_id: &str) -> Result<(), GateError> {
        tracing::debug!(user_id = %user_id, "logout");
        self.destroy(session_id, user_id)
    }

    fn load(&self, session_id: &str) -> Result<Option<Session>, GateError> {
        let Some(payload) = self.store.get(&keys::session(session_id))? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(session) => Ok(Some(session)),
            Err(_) => {
                // A record we cannot parse is as good as no record.
                self.store.delete(&keys::session(session_id))?;
                Ok(None)
            }
        }
    }

    fn login(&self, user: &User, token: &str) -> Result<AuthOutcome, GateError> {
        let now = self.clock.now_utc();
        let session_id = derive_session_id(&user.id, token, now);
        let mut session = Session {
            user_id: user.id.clone(),
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role: user.role.clone(),
            logged_in_at: now,
            last_activity_at: now,
        };
        self.touch(&session_id, &mut session)?;
        tracing::debug!(user_id = %user.id, "session created from remember credential");

        Ok(AuthOutcome {
            session_id,
            session,
            resumed: false,
        })
    }

    fn destroy(&self, session_id: &str, user_id: &str) -> Result<(), GateError> {
        self.store.delete(&keys::session(session_id))?;
        self.store.delete(&keys::activity(user_id))
    }
}

/// Derive a session id from the login identity and instant.
///
/// SHA-256 keeps the remember credential out of the cache key space.
fn derive_session_id(user_id: &str, token: &str, now: DateTime<Utc>) -> String {
    let hash = Sha256::digest(format!("{}:{}:{}", user_id, token, now.to_rfc3339()).as_bytes());
    hex::encode(hash)
}
