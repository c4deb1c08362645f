//! # Romgate
//!
//! **Request admission and download-quota enforcement for
//! subscription-gated firmware delivery.**
//!
//! Romgate decides, for every incoming storefront request: whether the
//! user is authenticated, whether their session is still live, whether
//! they are within their per-route call-rate budget, and whether a
//! requested download would exceed their daily/monthly download-count or
//! monthly bandwidth-byte allowance.
//!
//! ## Features
//!
//! - **Session lifecycle** — remember-credential login, 2-hour inactivity
//!   timeout, per-request account-status enforcement
//! - **Fixed-window rate limiting** — per (route, client, user) budgets
//!   with limit/remaining/retry-after metadata
//! - **Quota enforcement** — daily/monthly download counts and monthly
//!   bandwidth bytes, checked and counted inside one row-scoped
//!   transaction so limits are never transiently exceeded
//! - **Signed download tokens** — Ed25519-signed, one-hour capabilities a
//!   delivery edge can verify with only the public key
//! - **Fail-closed** — an unreachable store denies the gated operation,
//!   never silently allows it
//!
//! ## Quickstart
//!
//! ```no_run
//! use romgate::store::memory::MemoryStore;
//! use romgate::{Admission, AdmissionManager, Directories, GateConfig, RequestContext, SystemClock};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), romgate::GateError> {
//!     let config = GateConfig {
//!         signing_seed_hex: std::env::var("TOKEN_SIGNING_SEED").expect("seed").to_string(),
//!         ..GateConfig::default()
//!     };
//!
//!     let store = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
//!     let directories: Directories = todo!("wire your user/subscription/file/history stores");
//!     let manager = AdmissionManager::new(config, store, directories)?;
//!
//!     let request = RequestContext {
//!         route: "downloads.create".to_string(),
//!         client_ip: "203.0.113.9".to_string(),
//!         original_url: "/files/f1/download".to_string(),
//!         user_agent: "curl/8".to_string(),
//!         session_id: None,
//!         remember_token: Some("the-cookie-value".to_string()),
//!         wants_json: true,
//!         download_file_id: Some("f1".to_string()),
//!     };
//!
//!     match manager.admit(&request) {
//!         Admission::Proceed { grant: Some(grant), .. } => {
//!             println!("redirect to {}", grant.token.target_url);
//!         }
//!         Admission::Proceed { .. } => println!("admitted"),
//!         Admission::Redirect { location, .. } => println!("redirect to {}", location),
//!         Admission::Json { status, body } => println!("{}: {}", status, body),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Design notes
//!
//! - Components receive the ephemeral store, clock and collaborator
//!   directories by injection; there is no process-global state.
//! - The rate limiter is a fixed window, not sliding: bursts straddling a
//!   window boundary can see up to twice the budget. Documented trade-off.
//! - Quota counter mutations happen inside
//!   [`directory::SubscriptionDirectory::update`], a row-scoped
//!   transaction, so concurrent downloads cannot jointly overshoot a
//!   limit.

#![deny(warnings)]
#![deny(missing_docs)]

// Core modules
pub mod clock;
pub mod config;
pub mod errors;

// Shared substrate
pub mod store;

// External collaborators
pub mod directory;

// Admission layers
pub mod limit;
pub mod quota;
pub mod session;
pub mod token;

// Pipeline and the main public API
pub mod manager;
pub mod pipeline;

// Re-exports for public API
pub use clock::{Clock, SystemClock};
pub use config::{GateConfig, RouteLimit};
pub use errors::GateError;
pub use manager::{AdmissionManager, Directories};
pub use pipeline::{Admission, RateStatus, RequestContext};
pub use quota::DownloadGrant;
pub use session::Session;
pub use token::DownloadToken;

#[cfg(any(test, feature = "test-seams"))]
pub use clock::MockClock;
