//! Romgate error types.
//!
//! Every variant here is an expected, recoverable admission outcome that is
//! surfaced to the caller with an actionable message. `StoreUnavailable` is
//! the one infrastructural failure; it always fails closed (the gated
//! operation is denied, never silently allowed).

use thiserror::Error;

/// Errors that can occur while admitting a request or granting a download.
#[derive(Debug, Error)]
pub enum GateError {
    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No valid session and no usable remember credential.
    #[error("Not authenticated")]
    Unauthenticated,

    /// Session exceeded the inactivity timeout and was destroyed.
    #[error("Session expired after inactivity")]
    SessionExpired,

    /// The owning account is no longer active.
    #[error("Account is suspended")]
    AccountSuspended,

    /// Too many requests for this route within the current window.
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded {
        /// Seconds until the current window resets.
        retry_after_secs: i64,
    },

    /// The user has no active subscription.
    #[error("No active subscription")]
    NoSubscription,

    /// The subscription's daily download count is used up.
    #[error("Daily download limit reached")]
    DailyLimitExceeded,

    /// The subscription's monthly download count is used up.
    #[error("Monthly download limit reached")]
    MonthlyLimitExceeded,

    /// The download would exceed the monthly bandwidth allowance.
    #[error("Bandwidth limit exceeded ({remaining_bytes} bytes remaining)")]
    BandwidthExceeded {
        /// Bytes still available in the current billing period.
        remaining_bytes: u64,
    },

    /// The original download is older than the redownload window.
    #[error("Redownload window expired")]
    RedownloadWindowExpired,

    /// No file with the requested id.
    #[error("File not found")]
    FileNotFound,

    /// No download record with the requested id for this user.
    #[error("Download record not found")]
    DownloadNotFound,

    /// Download token failed signature verification.
    #[error("Download token invalid")]
    TokenInvalid,

    /// Download token is past its expiry.
    #[error("Download token expired")]
    TokenExpired,

    /// The ephemeral or durable store cannot be reached (fail closed).
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}
