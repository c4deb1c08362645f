//! Admission Manager - the main public API for Romgate.
//!
//! The `AdmissionManager` wires config, clock, the ephemeral store and the
//! collaborator directories into the session, rate-limit and quota layers,
//! and exposes the operations a storefront host needs:
//! - `admit` runs the full pipeline for one request
//! - `request_download` / `redownload` run the quota grant flow directly
//! - `logout` and `verify_token` round out the session and token lifecycles
//!
//! Every dependency is injected; the manager owns no global state.

use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::directory::{DownloadHistory, FileDirectory, SubscriptionDirectory, UserDirectory};
use crate::limit::RateLimiter;
use crate::pipeline::{Admission, AdmissionPipeline, RequestContext};
use crate::quota::{DownloadGrant, QuotaEnforcer};
use crate::session::SessionManager;
use crate::store::EphemeralStore;
use crate::token::{DownloadToken, TokenSigner};
use crate::GateError;
use std::sync::Arc;

/// The collaborator directories the admission layer depends on.
#[derive(Clone)]
pub struct Directories {
    /// User store access.
    pub users: Arc<dyn UserDirectory>,
    /// Subscription store access.
    pub subscriptions: Arc<dyn SubscriptionDirectory>,
    /// File catalog access.
    pub files: Arc<dyn FileDirectory>,
    /// Durable download audit log.
    pub history: Arc<dyn DownloadHistory>,
}

/// Main admission manager.
///
/// Create one instance per process and reuse it for all requests.
pub struct AdmissionManager {
    config: GateConfig,
    clock: Arc<dyn Clock>,
    sessions: Arc<SessionManager>,
    quota: Arc<QuotaEnforcer>,
    signer: Arc<TokenSigner>,
    pipeline: AdmissionPipeline,
}

impl AdmissionManager {
    /// Create a manager with the given configuration, store and
    /// directories, using the system clock.
    ///
    /// # Errors
    /// Returns an error if configuration validation fails or the token
    /// signing seed cannot be decoded.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn EphemeralStore>,
        directories: Directories,
    ) -> Result<Self, GateError> {
        config.validate()?;
        Self::with_clock(config, store, directories, Arc::new(SystemClock))
    }

    /// Create a manager with a custom clock (for testing).
    #[cfg(any(test, feature = "test-seams"))]
    pub fn new_with_clock(
        config: GateConfig,
        store: Arc<dyn EphemeralStore>,
        directories: Directories,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        config.validate()?;
        Self::with_clock(config, store, directories, clock)
    }

    fn with_clock(
        config: GateConfig,
        store: Arc<dyn EphemeralStore>,
        directories: Directories,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GateError> {
        let signer = Arc::new(TokenSigner::from_seed_hex(&config.signing_seed_hex)?);

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            directories.users.clone(),
            clock.clone(),
            config.session_timeout,
        ));
        let limiter = Arc::new(RateLimiter::new(store.clone(), clock.clone()));
        let quota = Arc::new(QuotaEnforcer::new(
            store.clone(),
            directories.subscriptions,
            directories.files,
            directories.history,
            signer.clone(),
            clock.clone(),
            &config,
        ));
        let pipeline = AdmissionPipeline::new(
            config.clone(),
            store,
            sessions.clone(),
            limiter,
            quota.clone(),
        );

        Ok(Self {
            config,
            clock,
            sessions,
            quota,
            signer,
            pipeline,
        })
    }

    /// Run the admission pipeline for one request.
    ///
    /// Never returns `Err`: every rejection is already mapped to the
    /// terminal [`Admission`] the client should see.
    pub fn admit(&self, request: &RequestContext) -> Admission {
        self.pipeline.admit(request)
    }

    /// Grant a download outside the pipeline (e.g. from a handler that has
    /// already admitted the request).
    pub fn request_download(
        &self,
        user_id: &str,
        file_id: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<DownloadGrant, GateError> {
        self.quota.grant(user_id, file_id, client_ip, user_agent)
    }

    /// Re-grant a past download within the redownload window.
    pub fn redownload(
        &self,
        user_id: &str,
        download_id: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<DownloadGrant, GateError> {
        self.quota
            .redownload(user_id, download_id, client_ip, user_agent)
    }

    /// Explicit logout: destroys the session and its activity entry.
    pub fn logout(&self, session_id: &str, user_id: &str) -> Result<(), GateError> {
        self.sessions.logout(session_id, user_id)
    }

    /// Verify a download token's signature and expiry.
    pub fn verify_token(&self, token: &DownloadToken) -> Result<(), GateError> {
        self.signer.verify(token, self.clock.as_ref())
    }

    /// Hex-encoded verifying key for delivery edges that check tokens.
    pub fn verifying_key_hex(&self) -> String {
        self.signer.verifying_key_hex()
    }

    /// Pop the URL preserved for this client before it was sent to login.
    pub fn take_intended_url(
        &self,
        request: &RequestContext,
    ) -> Result<Option<String>, GateError> {
        self.pipeline.take_intended_url(request)
    }

    /// Get the current configuration.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
