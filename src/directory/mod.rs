//! External collaborator interfaces.
//!
//! The admission layer never owns users, subscriptions, files or download
//! history; it reaches them through these traits. Implementations that talk
//! to a network store must apply a short request timeout (a few seconds)
//! and surface failures as [`GateError::StoreUnavailable`] — the layer
//! treats every collaborator error as a denial, never as an allow.

pub mod history;
pub mod memory;

use crate::GateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account standing as recorded in the user store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// Account in good standing.
    Active,
    /// Temporarily locked out; sessions are force-expired.
    Suspended,
    /// Permanently closed.
    Closed,
}

/// User entity, as much of it as admission decisions need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable user id.
    pub id: String,
    /// Login email.
    pub email: String,
    /// Name shown in the storefront header.
    pub display_name: String,
    /// Authorization role (e.g. "member", "admin").
    pub role: String,
    /// Current account standing, re-read on every request.
    pub status: AccountStatus,
    /// Persistent login credential, if the user opted in.
    pub remember_token: Option<String>,
}

/// Per-subscription quota state.
///
/// The `*_used_*` counters are only ever mutated inside
/// [`SubscriptionDirectory::update`], which is what keeps the enforced
/// invariants (`used <= limit`, never transiently exceeded) true under
/// concurrent downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    /// Stable subscription id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Whether the subscription is currently paid up.
    pub is_active: bool,
    /// Downloads counted against today.
    pub downloads_used_today: u32,
    /// Downloads counted against the current billing period.
    pub downloads_used_month: u32,
    /// Bytes counted against the current billing period.
    pub bandwidth_used_bytes: u64,
    /// Daily download ceiling.
    pub daily_limit: u32,
    /// Monthly download ceiling.
    pub monthly_limit: u32,
    /// Monthly bandwidth ceiling in bytes.
    pub monthly_bandwidth_limit_bytes: u64,
    /// When the current billing period ends; advances forward only.
    pub bandwidth_reset_date: DateTime<Utc>,
}

impl Subscription {
    /// Bytes still available in the current billing period.
    pub fn remaining_bandwidth(&self) -> u64 {
        self.monthly_bandwidth_limit_bytes
            .saturating_sub(self.bandwidth_used_bytes)
    }
}

/// Downloadable file entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    /// Stable file id.
    pub id: String,
    /// Payload size, counted against bandwidth quota.
    pub size_bytes: u64,
    /// Where the bytes actually live; grants redirect here.
    pub external_url: String,
    /// Lifetime download tally.
    pub download_count: u64,
}

/// Append-only audit entry, one per granted download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Stable record id.
    pub id: String,
    /// User the grant was issued to.
    pub user_id: String,
    /// File that was granted.
    pub file_id: String,
    /// Client IP at grant time.
    pub ip_address: String,
    /// Client user agent at grant time.
    pub user_agent: String,
    /// Grant instant; the redownload window is measured from here.
    pub downloaded_at: DateTime<Utc>,
}

/// Read access to the user store.
pub trait UserDirectory: Send + Sync {
    /// Look up a user by id.
    fn find_by_id(&self, user_id: &str) -> Result<Option<User>, GateError>;

    /// Look up a user by persistent remember credential.
    fn find_by_remember_token(&self, token: &str) -> Result<Option<User>, GateError>;
}

/// Access to subscription rows, including the transactional update the
/// quota enforcer builds on.
pub trait SubscriptionDirectory: Send + Sync {
    /// The subscription owned by a user, if any.
    fn for_user(&self, user_id: &str) -> Result<Option<Subscription>, GateError>;

    /// Row-scoped transaction: `apply` runs against the current row state
    /// under serialization; an `Err` aborts with no partial write, `Ok`
    /// commits every mutation at once. Returns the committed row.
    fn update(
        &self,
        subscription_id: &str,
        apply: &mut dyn FnMut(&mut Subscription) -> Result<(), GateError>,
    ) -> Result<Subscription, GateError>;
}

/// Read and tally access to the file catalog.
pub trait FileDirectory: Send + Sync {
    /// Look up a file by id.
    fn find_by_id(&self, file_id: &str) -> Result<Option<StoredFile>, GateError>;

    /// Bump the lifetime download tally after a grant.
    fn increment_download_count(&self, file_id: &str) -> Result<(), GateError>;
}

/// Durable download audit log.
pub trait DownloadHistory: Send + Sync {
    /// Append one record; never mutates existing entries.
    fn append(&self, record: &DownloadRecord) -> Result<(), GateError>;

    /// A user's own record by id (redownload entry point).
    fn find_by_id_for_user(
        &self,
        download_id: &str,
        user_id: &str,
    ) -> Result<Option<DownloadRecord>, GateError>;
}
