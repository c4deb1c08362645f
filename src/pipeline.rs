//! Ordered admission pipeline.
//!
//! Every request runs the same explicit stage chain — session, rate limit,
//! quota — and each stage either continues or halts with a terminal
//! [`Admission`]. The first rejection short-circuits the rest; there is no
//! hidden middleware ordering.
//!
//! Rejection shape follows the client: JSON-expecting clients get a
//! structured 401/429 body, browser clients get a redirect to the login
//! (or subscribe) page with a flashed message, and the originally
//! requested URL is preserved in the ephemeral store so the client can
//! resume after re-authenticating. `StoreUnavailable` always denies (503),
//! never falls through to an allow.

use crate::limit::{RateDecision, RateLimiter};
use crate::quota::{DownloadGrant, QuotaEnforcer};
use crate::session::{AuthOutcome, Session, SessionManager};
use crate::store::{keys, EphemeralStore};
use crate::{GateConfig, GateError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How long a preserved original URL survives while the client logs in.
const INTENDED_URL_TTL: Duration = Duration::from_secs(30 * 60);

/// Everything the pipeline needs to know about one incoming request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Route identity, e.g. "downloads.create"; also the rate-limit scope.
    pub route: String,
    /// Client address, for rate signatures and audit records.
    pub client_ip: String,
    /// The full URL originally requested, preserved across re-auth.
    pub original_url: String,
    /// Client user agent, recorded on grants.
    pub user_agent: String,
    /// Session identity presented by the client, if any.
    pub session_id: Option<String>,
    /// Persistent remember credential, if presented.
    pub remember_token: Option<String>,
    /// Whether the client expects a structured JSON error over a redirect.
    pub wants_json: bool,
    /// File id when this request asks for a download; `None` passes the
    /// quota stage untouched.
    pub download_file_id: Option<String>,
}

/// Rate-limit metadata carried back on allowed requests.
#[derive(Debug, Clone, Copy)]
pub struct RateStatus {
    /// The window's full budget.
    pub limit: u32,
    /// Requests left in the current window.
    pub remaining: u32,
}

/// Terminal pipeline outcome.
#[derive(Debug)]
pub enum Admission {
    /// All stages passed; the downstream handler may run.
    Proceed {
        /// Session identity to re-issue to the client.
        session_id: String,
        /// The authenticated, touched session.
        session: Session,
        /// Limit/remaining metadata for response headers.
        rate: Option<RateStatus>,
        /// The approved download, when this request asked for one.
        grant: Option<DownloadGrant>,
    },
    /// Browser client must navigate elsewhere (login, subscribe page, or a
    /// granted file's external URL).
    Redirect {
        /// Where to send the client.
        location: String,
        /// One-shot message to surface after the redirect.
        flash: Option<String>,
    },
    /// Structured rejection for JSON-expecting clients.
    Json {
        /// HTTP status to respond with.
        status: u16,
        /// Response body.
        body: serde_json::Value,
    },
}

enum StageFlow {
    Continue,
    #[allow(dead_code)]
    Halt(Admission),
}

#[derive(Default)]
struct StageState {
    auth: Option<AuthOutcome>,
    rate: Option<RateStatus>,
    grant: Option<DownloadGrant>,
}

type StageFn =
    fn(&AdmissionPipeline, &RequestContext, &mut StageState) -> Result<StageFlow, GateError>;

/// The composed admission chain.
pub struct AdmissionPipeline {
    config: GateConfig,
    store: Arc<dyn EphemeralStore>,
    sessions: Arc<SessionManager>,
    limiter: Arc<RateLimiter>,
    quota: Arc<QuotaEnforcer>,
}

impl AdmissionPipeline {
    /// Assemble the chain from its stages' dependencies.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn EphemeralStore>,
        sessions: Arc<SessionManager>,
        limiter: Arc<RateLimiter>,
        quota: Arc<QuotaEnforcer>,
    ) -> Self {
        Self {
            config,
            store,
            sessions,
            limiter,
            quota,
        }
    }

    /// Run the full chain for one request.
    ///
    /// Stage order is fixed: session, rate limit, quota. The first
    /// rejection wins; errors are mapped to client-appropriate terminal
    /// outcomes and never escape as `Err`.
    pub fn admit(&self, request: &RequestContext) -> Admission {
        const STAGES: [StageFn; 3] = [
            AdmissionPipeline::stage_session,
            AdmissionPipeline::stage_rate_limit,
            AdmissionPipeline::stage_quota,
        ];

        let mut state = StageState::default();
        for stage in STAGES {
            match stage(self, request, &mut state) {
                Ok(StageFlow::Continue) => {}
                Ok(StageFlow::Halt(admission)) => return admission,
                Err(error) => return self.reject(request, error),
            }
        }

        match state.auth {
            Some(auth) => {
                tracing::debug!(user_id = %auth.session.user_id, route = %request.route, "request admitted");
                Admission::Proceed {
                    session_id: auth.session_id,
                    session: auth.session,
                    rate: state.rate,
                    grant: state.grant,
                }
            }
            // Unreachable with the fixed stage order; deny rather than leak.
            None => self.reject(request, GateError::Unauthenticated),
        }
    }

    /// Pop the URL preserved for this client before it was sent to login.
    pub fn take_intended_url(
        &self,
        request: &RequestContext,
    ) -> Result<Option<String>, GateError> {
        let key = keys::intended(client_key(request));
        let url = self.store.get(&key)?;
        if url.is_some() {
            self.store.delete(&key)?;
        }
        Ok(url)
    }

    fn stage_session(
        &self,
        request: &RequestContext,
        state: &mut StageState,
    ) -> Result<StageFlow, GateError> {
        let auth = self.sessions.authenticate(
            request.session_id.as_deref(),
            request.remember_token.as_deref(),
        )?;
        state.auth = Some(auth);
        Ok(StageFlow::Continue)
    }

    fn stage_rate_limit(
        &self,
        request: &RequestContext,
        state: &mut StageState,
    ) -> Result<StageFlow, GateError> {
        let budget = self.config.limit_for(&request.route);
        let user_id = state.auth.as_ref().map(|auth| auth.session.user_id.as_str());

        let decision = self.limiter.allow(
            &request.route,
            &request.client_ip,
            user_id,
            budget.max_attempts,
            budget.decay_window,
        )?;

        match decision {
            RateDecision::Allowed { limit, remaining } => {
                state.rate = Some(RateStatus { limit, remaining });
                Ok(StageFlow::Continue)
            }
            RateDecision::Denied { retry_after_secs } => {
                Err(GateError::RateLimitExceeded { retry_after_secs })
            }
        }
    }

    fn stage_quota(
        &self,
        request: &RequestContext,
        state: &mut StageState,
    ) -> Result<StageFlow, GateError> {
        let Some(file_id) = request.download_file_id.as_deref() else {
            return Ok(StageFlow::Continue);
        };
        let Some(auth) = state.auth.as_ref() else {
            return Err(GateError::Unauthenticated);
        };

        let grant = self.quota.grant(
            &auth.session.user_id,
            file_id,
            &request.client_ip,
            &request.user_agent,
        )?;
        state.grant = Some(grant);
        Ok(StageFlow::Continue)
    }

    /// Map an admission error to the terminal outcome the client sees.
    fn reject(&self, request: &RequestContext, error: GateError) -> Admission {
        match error {
            GateError::Unauthenticated | GateError::SessionExpired => {
                self.preserve_intended_url(request);
                self.auth_rejection(request, 401, "unauthenticated", "Please log in to continue")
            }
            GateError::AccountSuspended => {
                self.auth_rejection(request, 401, "account_suspended", "Your account is suspended")
            }
            GateError::RateLimitExceeded { retry_after_secs } => Admission::Json {
                status: 429,
                body: json!({
                    "reason": "rate_limited",
                    "message": "Too many requests",
                    "retry_after": retry_after_secs,
                }),
            },
            GateError::NoSubscription => {
                if request.wants_json {
                    Admission::Json {
                        status: 429,
                        body: json!({
                            "reason": "no_subscription",
                            "message": "An active subscription is required",
                        }),
                    }
                } else {
                    Admission::Redirect {
                        location: self.config.subscribe_path.clone(),
                        flash: Some("An active subscription is required".to_string()),
                    }
                }
            }
            GateError::DailyLimitExceeded => Admission::Json {
                status: 429,
                body: json!({
                    "reason": "daily",
                    "message": "Daily download limit reached",
                }),
            },
            GateError::MonthlyLimitExceeded => Admission::Json {
                status: 429,
                body: json!({
                    "reason": "monthly",
                    "message": "Monthly download limit reached",
                }),
            },
            GateError::BandwidthExceeded { remaining_bytes } => Admission::Json {
                status: 429,
                body: json!({
                    "reason": "bandwidth",
                    "message": "Monthly bandwidth limit exceeded",
                    "remaining_bytes": remaining_bytes,
                }),
            },
            GateError::FileNotFound | GateError::DownloadNotFound => Admission::Json {
                status: 404,
                body: json!({ "message": "Not found" }),
            },
            GateError::RedownloadWindowExpired => Admission::Json {
                status: 410,
                body: json!({
                    "reason": "redownload_expired",
                    "message": "Redownload window has expired",
                }),
            },
            GateError::TokenInvalid | GateError::TokenExpired => Admission::Json {
                status: 401,
                body: json!({ "message": "Download token rejected" }),
            },
            GateError::StoreUnavailable(ref detail) => {
                tracing::warn!(detail = %detail, route = %request.route, "store unavailable, denying request");
                Admission::Json {
                    status: 503,
                    body: json!({ "message": "Service temporarily unavailable" }),
                }
            }
            GateError::ConfigError(_) => Admission::Json {
                status: 500,
                body: json!({ "message": "Internal configuration error" }),
            },
        }
    }

    fn auth_rejection(
        &self,
        request: &RequestContext,
        status: u16,
        reason: &str,
        message: &str,
    ) -> Admission {
        if request.wants_json {
            Admission::Json {
                status,
                body: json!({ "reason": reason, "message": message }),
            }
        } else {
            Admission::Redirect {
                location: self.config.login_path.clone(),
                flash: Some(message.to_string()),
            }
        }
    }

    /// Best-effort: remember where the client was headed. A store failure
    /// here must not turn a login redirect into a 503.
    fn preserve_intended_url(&self, request: &RequestContext) {
        let key = keys::intended(client_key(request));
        if let Err(e) = self
            .store
            .put(&key, &request.original_url, INTENDED_URL_TTL)
        {
            tracing::debug!(error = %e, "could not preserve intended URL");
        }
    }
}

/// The identity the intended URL is preserved under: the session if the
/// client has one, otherwise the address.
fn client_key(request: &RequestContext) -> &str {
    request
        .session_id
        .as_deref()
        .unwrap_or(&request.client_ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::directory::memory::{MemoryFiles, MemoryHistory, MemorySubscriptions, MemoryUsers};
    use crate::directory::{AccountStatus, StoredFile, Subscription, SubscriptionDirectory, User};
    use crate::store::memory::MemoryStore;
    use crate::token::TokenSigner;
    use chrono::{TimeZone, Utc};

    const SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

    struct Fixture {
        clock: MockClock,
        users: Arc<MemoryUsers>,
        subs: Arc<MemorySubscriptions>,
        pipeline: AdmissionPipeline,
    }

    fn fixture() -> Fixture {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
        let users = Arc::new(MemoryUsers::new());
        let subs = Arc::new(MemorySubscriptions::new());
        let files = Arc::new(MemoryFiles::new());
        let history = Arc::new(MemoryHistory::new());
        let config = GateConfig {
            signing_seed_hex: SEED_HEX.to_string(),
            ..GateConfig::default()
        };

        users.upsert(User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: "u1".to_string(),
            role: "member".to_string(),
            status: AccountStatus::Active,
            remember_token: Some("remember-u1".to_string()),
        });
        subs.upsert(Subscription {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            is_active: true,
            downloads_used_today: 0,
            downloads_used_month: 0,
            bandwidth_used_bytes: 0,
            daily_limit: 10,
            monthly_limit: 100,
            monthly_bandwidth_limit_bytes: 1_000_000,
            bandwidth_reset_date: Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        });
        files.upsert(StoredFile {
            id: "f1".to_string(),
            size_bytes: 1000,
            external_url: "https://cdn.example.com/f1.bin".to_string(),
            download_count: 0,
        });

        let clock_arc: Arc<dyn crate::clock::Clock> = Arc::new(clock.clone());
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            users.clone(),
            clock_arc.clone(),
            config.session_timeout,
        ));
        let limiter = Arc::new(RateLimiter::new(store.clone(), clock_arc.clone()));
        let signer = Arc::new(TokenSigner::from_seed_hex(SEED_HEX).unwrap());
        let quota = Arc::new(QuotaEnforcer::new(
            store.clone(),
            subs.clone(),
            files,
            history,
            signer,
            clock_arc,
            &config,
        ));
        let pipeline = AdmissionPipeline::new(config, store, sessions, limiter, quota);

        Fixture {
            clock,
            users,
            subs,
            pipeline,
        }
    }

    fn browser_request() -> RequestContext {
        RequestContext {
            route: "files.show".to_string(),
            client_ip: "203.0.113.9".to_string(),
            original_url: "/files/f1".to_string(),
            user_agent: "test-agent".to_string(),
            session_id: None,
            remember_token: Some("remember-u1".to_string()),
            wants_json: false,
            download_file_id: None,
        }
    }

    fn login(fx: &Fixture) -> String {
        match fx.pipeline.admit(&browser_request()) {
            Admission::Proceed { session_id, .. } => session_id,
            other => panic!("expected proceed, got {:?}", other),
        }
    }

    #[test]
    fn guest_browser_is_redirected_to_login_with_url_preserved() {
        let fx = fixture();
        let request = RequestContext {
            remember_token: None,
            ..browser_request()
        };

        match fx.pipeline.admit(&request) {
            Admission::Redirect { location, flash } => {
                assert_eq!(location, "/login");
                assert!(flash.is_some());
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        let intended = fx.pipeline.take_intended_url(&request).unwrap();
        assert_eq!(intended, Some("/files/f1".to_string()));
        // Popped: a second read is empty.
        assert_eq!(fx.pipeline.take_intended_url(&request).unwrap(), None);
    }

    #[test]
    fn guest_json_client_gets_401() {
        let fx = fixture();
        let request = RequestContext {
            remember_token: None,
            wants_json: true,
            ..browser_request()
        };

        match fx.pipeline.admit(&request) {
            Admission::Json { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body["reason"], "unauthenticated");
            }
            other => panic!("expected json, got {:?}", other),
        }
    }

    #[test]
    fn authenticated_request_proceeds_with_rate_metadata() {
        let fx = fixture();
        match fx.pipeline.admit(&browser_request()) {
            Admission::Proceed {
                session, rate, grant, ..
            } => {
                assert_eq!(session.user_id, "u1");
                let rate = rate.expect("rate metadata");
                assert_eq!(rate.limit, 60);
                assert_eq!(rate.remaining, 59);
                assert!(grant.is_none());
            }
            other => panic!("expected proceed, got {:?}", other),
        }
    }

    #[test]
    fn sixty_first_request_in_a_minute_is_rate_limited() {
        let fx = fixture();
        let session_id = login(&fx);
        let request = RequestContext {
            session_id: Some(session_id),
            remember_token: None,
            wants_json: true,
            ..browser_request()
        };

        // Login consumed one slot on this route already.
        for _ in 0..59 {
            assert!(matches!(
                fx.pipeline.admit(&request),
                Admission::Proceed { .. }
            ));
        }
        match fx.pipeline.admit(&request) {
            Admission::Json { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body["reason"], "rate_limited");
                let retry_after = body["retry_after"].as_i64().unwrap();
                assert!(retry_after <= 60);
            }
            other => panic!("expected 429, got {:?}", other),
        }
    }

    #[test]
    fn download_request_carries_a_grant() {
        let fx = fixture();
        let request = RequestContext {
            route: "downloads.create".to_string(),
            download_file_id: Some("f1".to_string()),
            ..browser_request()
        };

        match fx.pipeline.admit(&request) {
            Admission::Proceed { grant, .. } => {
                let grant = grant.expect("download grant");
                assert_eq!(grant.token.target_url, "https://cdn.example.com/f1.bin");
                assert_eq!(grant.subscription.downloads_used_today, 1);
            }
            other => panic!("expected proceed with grant, got {:?}", other),
        }
    }

    #[test]
    fn missing_subscription_redirects_browsers_and_429s_json() {
        let fx = fixture();
        fx.subs
            .update("s1", &mut |row| {
                row.is_active = false;
                Ok(())
            })
            .unwrap();

        let request = RequestContext {
            route: "downloads.create".to_string(),
            download_file_id: Some("f1".to_string()),
            ..browser_request()
        };
        match fx.pipeline.admit(&request) {
            Admission::Redirect { location, .. } => assert_eq!(location, "/subscriptions"),
            other => panic!("expected redirect, got {:?}", other),
        }

        let request = RequestContext {
            wants_json: true,
            ..request
        };
        match fx.pipeline.admit(&request) {
            Admission::Json { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body["reason"], "no_subscription");
            }
            other => panic!("expected json, got {:?}", other),
        }
    }

    #[test]
    fn exhausted_daily_quota_is_a_structured_429() {
        let fx = fixture();
        fx.subs
            .update("s1", &mut |row| {
                row.daily_limit = 1;
                Ok(())
            })
            .unwrap();

        let request = RequestContext {
            route: "downloads.create".to_string(),
            download_file_id: Some("f1".to_string()),
            wants_json: true,
            ..browser_request()
        };
        assert!(matches!(
            fx.pipeline.admit(&request),
            Admission::Proceed { .. }
        ));
        match fx.pipeline.admit(&request) {
            Admission::Json { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body["reason"], "daily");
            }
            other => panic!("expected 429, got {:?}", other),
        }
    }

    #[test]
    fn suspended_account_halts_at_the_session_stage() {
        let fx = fixture();
        let session_id = login(&fx);

        fx.users.upsert(User {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
            display_name: "u1".to_string(),
            role: "member".to_string(),
            status: AccountStatus::Suspended,
            remember_token: Some("remember-u1".to_string()),
        });

        let request = RequestContext {
            session_id: Some(session_id),
            remember_token: None,
            wants_json: true,
            ..browser_request()
        };
        match fx.pipeline.admit(&request) {
            Admission::Json { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body["reason"], "account_suspended");
            }
            other => panic!("expected 401, got {:?}", other),
        }
    }

    #[test]
    fn expired_session_redirects_back_through_login() {
        let fx = fixture();
        let session_id = login(&fx);
        fx.clock
            .advance(chrono::Duration::hours(2) + chrono::Duration::seconds(1));

        let request = RequestContext {
            session_id: Some(session_id),
            remember_token: None,
            ..browser_request()
        };
        match fx.pipeline.admit(&request) {
            Admission::Redirect { location, .. } => assert_eq!(location, "/login"),
            other => panic!("expected redirect, got {:?}", other),
        }
    }

    /// A store that refuses every operation, to prove fail-closed behavior.
    struct DownStore;

    impl EphemeralStore for DownStore {
        fn get(&self, _key: &str) -> Result<Option<String>, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        fn delete(&self, _key: &str) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        fn increment_or_init(
            &self,
            _key: &str,
            _delta: i64,
            _ttl: Duration,
        ) -> Result<i64, GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
        fn update(
            &self,
            _key: &str,
            _ttl: Duration,
            _apply: &mut crate::store::UpdateFn<'_>,
        ) -> Result<(), GateError> {
            Err(GateError::StoreUnavailable("down".to_string()))
        }
    }

    #[test]
    fn unreachable_store_fails_closed_with_503() {
        let fx = fixture();
        let store: Arc<dyn EphemeralStore> = Arc::new(DownStore);
        let users = fx.users.clone();
        let clock: Arc<dyn crate::clock::Clock> = Arc::new(fx.clock.clone());
        let config = GateConfig {
            signing_seed_hex: SEED_HEX.to_string(),
            ..GateConfig::default()
        };

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            users,
            clock.clone(),
            config.session_timeout,
        ));
        let limiter = Arc::new(RateLimiter::new(store.clone(), clock.clone()));
        let signer = Arc::new(TokenSigner::from_seed_hex(SEED_HEX).unwrap());
        let quota = Arc::new(QuotaEnforcer::new(
            store.clone(),
            fx.subs.clone(),
            Arc::new(MemoryFiles::new()),
            Arc::new(MemoryHistory::new()),
            signer,
            clock,
            &config,
        ));
        let pipeline = AdmissionPipeline::new(config, store, sessions, limiter, quota);

        let request = RequestContext {
            session_id: Some("whatever".to_string()),
            remember_token: None,
            wants_json: true,
            ..browser_request()
        };
        match pipeline.admit(&request) {
            Admission::Json { status, .. } => assert_eq!(status, 503),
            other => panic!("expected 503, got {:?}", other),
        }
    }
}
