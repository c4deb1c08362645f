//! Romgate configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Per-route rate-limit budget.
#[derive(Debug, Clone, Copy)]
pub struct RouteLimit {
    /// Maximum requests allowed within one window.
    pub max_attempts: u32,

    /// Length of the fixed counting window.
    pub decay_window: Duration,
}

impl RouteLimit {
    /// Construct a budget of `max_attempts` requests per `decay_window`.
    pub fn new(max_attempts: u32, decay_window: Duration) -> Self {
        Self {
            max_attempts,
            decay_window,
        }
    }
}

/// Configuration for the admission layer.
///
/// One instance per process; all components read their timeouts, windows
/// and paths from here.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Inactivity timeout after which a session is destroyed.
    pub session_timeout: Duration,

    /// Lifetime of a minted download token.
    pub token_ttl: Duration,

    /// How long after the original download a redownload is honored.
    pub redownload_window: Duration,

    /// Rate-limit budget applied to routes without an explicit entry.
    pub default_limit: RouteLimit,

    /// Per-route overrides of the default budget, keyed by route identity.
    pub route_limits: HashMap<String, RouteLimit>,

    /// Path clients are redirected to when they must (re)authenticate.
    pub login_path: String,

    /// Path clients without an active subscription are redirected to.
    pub subscribe_path: String,

    /// Ed25519 signing seed for download tokens (hex-encoded, 64 characters).
    /// SECURITY: provision from deployment secrets, never commit to source.
    pub signing_seed_hex: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(2 * 60 * 60),
            token_ttl: Duration::from_secs(60 * 60),
            redownload_window: Duration::from_secs(7 * 24 * 60 * 60),
            default_limit: RouteLimit::new(60, Duration::from_secs(60)),
            route_limits: HashMap::new(),
            login_path: "/login".to_string(),
            subscribe_path: "/subscriptions".to_string(),
            signing_seed_hex: String::new(),
        }
    }
}

impl GateConfig {
    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), crate::GateError> {
        if self.signing_seed_hex.len() != 64 {
            return Err(crate::GateError::ConfigError(format!(
                "signing_seed_hex must be 64 hex characters, got {}",
                self.signing_seed_hex.len()
            )));
        }
        if self.session_timeout.is_zero() {
            return Err(crate::GateError::ConfigError(
                "session_timeout cannot be zero".to_string(),
            ));
        }
        if self.token_ttl.is_zero() {
            return Err(crate::GateError::ConfigError(
                "token_ttl cannot be zero".to_string(),
            ));
        }
        if self.default_limit.max_attempts == 0 {
            return Err(crate::GateError::ConfigError(
                "default_limit.max_attempts cannot be zero".to_string(),
            ));
        }
        if self.login_path.is_empty() {
            return Err(crate::GateError::ConfigError(
                "login_path cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the rate-limit budget for a route.
    pub fn limit_for(&self, route: &str) -> RouteLimit {
        self.route_limits
            .get(route)
            .copied()
            .unwrap_or(self.default_limit)
    }
}
