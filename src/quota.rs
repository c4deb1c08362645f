//! Subscription quota enforcement and the download grant flow.
//!
//! Ordering matters: a request must pass the active-subscription check,
//! rolling resets, then the daily, monthly and bandwidth checks before any
//! counter moves. All counter mutations for one grant commit inside a
//! single row-scoped `SubscriptionDirectory::update` transaction, so
//! concurrent downloads can never both pass a check against a stale
//! counter and jointly overshoot a limit.
//!
//! Monthly counters (download count and bandwidth bytes) reset together,
//! never separately; the daily counter resets independently, detected via
//! a daily marker in the ephemeral store.

use crate::clock::Clock;
use crate::directory::{
    DownloadHistory, DownloadRecord, FileDirectory, Subscription, SubscriptionDirectory,
};
use crate::store::{keys, EphemeralStore};
use crate::token::{DownloadToken, TokenSigner};
use crate::{GateConfig, GateError};
use chrono::{DateTime, Datelike, Months, Utc};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// TTL for the daily reset marker; outlives the day it marks.
const DAILY_MARKER_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// A fully approved download.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    /// Signed capability; `token.target_url` is the redirect target.
    pub token: DownloadToken,
    /// The durable audit entry written for this grant.
    pub record: DownloadRecord,
    /// Committed post-grant quota state, for remaining-allowance display.
    pub subscription: Subscription,
}

/// Enforces download-count and bandwidth quotas per subscription.
pub struct QuotaEnforcer {
    store: Arc<dyn EphemeralStore>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    files: Arc<dyn FileDirectory>,
    history: Arc<dyn DownloadHistory>,
    signer: Arc<TokenSigner>,
    clock: Arc<dyn Clock>,
    token_ttl: Duration,
    redownload_window: Duration,
    grant_seq: AtomicU64,
}

impl QuotaEnforcer {
    /// Create an enforcer reading token TTL and redownload window from config.
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        files: Arc<dyn FileDirectory>,
        history: Arc<dyn DownloadHistory>,
        signer: Arc<TokenSigner>,
        clock: Arc<dyn Clock>,
        config: &GateConfig,
    ) -> Self {
        Self {
            store,
            subscriptions,
            files,
            history,
            signer,
            clock,
            token_ttl: config.token_ttl,
            redownload_window: config.redownload_window,
            grant_seq: AtomicU64::new(0),
        }
    }

    /// The user's subscription, required to be present and active.
    pub fn require_active_subscription(&self, user_id: &str) -> Result<Subscription, GateError> {
        match self.subscriptions.for_user(user_id)? {
            Some(subscription) if subscription.is_active => Ok(subscription),
            _ => Err(GateError::NoSubscription),
        }
    }

    /// Apply rolling resets to a draft row.
    ///
    /// If the billing period has passed, the monthly download count and the
    /// bandwidth bytes zero together and the reset date advances by whole
    /// months until it is in the future. If the daily marker disagrees with
    /// today, the daily count zeroes independently. Returns whether the
    /// daily marker must be rewritten — callers persist it only after the
    /// surrounding transaction commits, so an aborted grant re-detects the
    /// rollover instead of losing it.
    ///
    /// Idempotent: a second call before either boundary passes again is a
    /// no-op on the counters.
    pub fn refresh_if_elapsed(&self, row: &mut Subscription) -> Result<bool, GateError> {
        let now = self.clock.now_utc();

        if row.bandwidth_reset_date <= now {
            // Month-scoped counters reset as a unit, never one without the
            // other.
            row.downloads_used_month = 0;
            row.bandwidth_used_bytes = 0;
            while row.bandwidth_reset_date <= now {
                row.bandwidth_reset_date = row
                    .bandwidth_reset_date
                    .checked_add_months(Months::new(1))
                    .ok_or_else(|| {
                        GateError::StoreUnavailable("billing period overflow".to_string())
                    })?;
            }
        }

        let today = format_date(&now);
        let marker = self.store.get(&keys::daily_reset(&row.id))?;
        if marker.as_deref() != Some(today.as_str()) {
            row.downloads_used_today = 0;
            return Ok(true);
        }
        Ok(false)
    }

    /// Deny when today's download count is used up.
    pub fn check_daily(&self, row: &Subscription) -> Result<(), GateError> {
        if row.downloads_used_today >= row.daily_limit {
            return Err(GateError::DailyLimitExceeded);
        }
        Ok(())
    }

    /// Deny when the billing period's download count is used up.
    pub fn check_monthly(&self, row: &Subscription) -> Result<(), GateError> {
        if row.downloads_used_month >= row.monthly_limit {
            return Err(GateError::MonthlyLimitExceeded);
        }
        Ok(())
    }

    /// Deny when the download would cross the bandwidth allowance.
    ///
    /// A download that exactly fits the remaining allowance is granted; one
    /// byte more is denied, reporting what is left.
    pub fn check_bandwidth(&self, row: &Subscription, size_bytes: u64) -> Result<(), GateError> {
        if size_bytes > row.remaining_bandwidth() {
            return Err(GateError::BandwidthExceeded {
                remaining_bytes: row.remaining_bandwidth(),
            });
        }
        Ok(())
    }

    /// Run the full grant flow for one download request.
    ///
    /// On approval: counters are committed, the audit record appended, the
    /// file tally bumped and a one-hour token minted and cached. A denial
    /// leaves every counter exactly as it was.
    pub fn grant(
        &self,
        user_id: &str,
        file_id: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<DownloadGrant, GateError> {
        let file = self
            .files
            .find_by_id(file_id)?
            .ok_or(GateError::FileNotFound)?;
        let subscription = self.require_active_subscription(user_id)?;

        let mut daily_rolled = false;
        let committed = self.subscriptions.update(&subscription.id, &mut |row| {
            if !row.is_active {
                return Err(GateError::NoSubscription);
            }
            daily_rolled = self.refresh_if_elapsed(row)?;
            self.check_daily(row)?;
            self.check_monthly(row)?;
            self.check_bandwidth(row, file.size_bytes)?;

            row.downloads_used_today += 1;
            row.downloads_used_month += 1;
            row.bandwidth_used_bytes += file.size_bytes;
            Ok(())
        })?;

        let now = self.clock.now_utc();
        if daily_rolled {
            self.store.put(
                &keys::daily_reset(&committed.id),
                &format_date(&now),
                DAILY_MARKER_TTL,
            )?;
        }

        let record = DownloadRecord {
            id: self.next_record_id(user_id, file_id, now),
            user_id: user_id.to_string(),
            file_id: file_id.to_string(),
            ip_address: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            downloaded_at: now,
        };
        if let Err(e) = self.history.append(&record) {
            // The quota is already consumed; surface the failure rather
            // than silently granting an unaudited download.
            tracing::warn!(user_id = %user_id, file_id = %file_id, error = %e, "history append failed after grant");
            return Err(e);
        }
        self.files.increment_download_count(file_id)?;

        let token_expires = now
            + chrono::Duration::from_std(self.token_ttl)
                .map_err(|_| GateError::StoreUnavailable("token TTL out of range".to_string()))?;
        let token = self
            .signer
            .mint(file_id, user_id, token_expires, &file.external_url);

        let payload = serde_json::to_string(&token)
            .map_err(|e| GateError::StoreUnavailable(format!("token encode: {}", e)))?;
        self.store
            .put(&keys::token(&token.token), &payload, self.token_ttl)?;

        tracing::debug!(
            user_id = %user_id,
            file_id = %file_id,
            size_bytes = file.size_bytes,
            "download granted"
        );

        Ok(DownloadGrant {
            token,
            record,
            subscription: committed,
        })
    }

    /// Re-grant a past download.
    ///
    /// Honored only while the original record is within the redownload
    /// window (inclusive: exactly at the boundary is allowed), and only for
    /// the recording user. A redownload re-runs the full grant flow — it
    /// consumes bandwidth and counts against limits like any download.
    pub fn redownload(
        &self,
        user_id: &str,
        download_id: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<DownloadGrant, GateError> {
        let record = self
            .history
            .find_by_id_for_user(download_id, user_id)?
            .ok_or(GateError::DownloadNotFound)?;

        let age = self
            .clock
            .now_utc()
            .signed_duration_since(record.downloaded_at);
        let window = chrono::Duration::from_std(self.redownload_window).map_err(|_| {
            GateError::StoreUnavailable("redownload window out of range".to_string())
        })?;
        if age > window {
            return Err(GateError::RedownloadWindowExpired);
        }

        self.grant(user_id, &record.file_id, client_ip, user_agent)
    }

    fn next_record_id(&self, user_id: &str, file_id: &str, now: DateTime<Utc>) -> String {
        let seq = self.grant_seq.fetch_add(1, Ordering::Relaxed);
        let hash = Sha256::digest(
            format!("{}:{}:{}:{}", user_id, file_id, now.to_rfc3339(), seq).as_bytes(),
        );
        hex::encode(&hash[..8])
    }
}

/// Format a date as YYYY-MM-DD for the daily marker.
fn format_date(dt: &DateTime<Utc>) -> String {
    format!("{:04}-{:02}-{:02}", dt.year(), dt.month(), dt.day())
}
