//! Basic admission example.
//!
//! Wires the manager against in-memory directories and walks one request
//! through login, a rate-limited page view and a quota-checked download.
//!
//! # Running
//!
//! ```bash
//! export TOKEN_SIGNING_SEED="9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60"
//! cargo run --example basic_admission
//! ```
//!
//! # Note
//!
//! In production the signing seed comes from your deployment secrets and
//! the four directories are implemented over your relational store; the
//! in-memory ones here exist for tests and demos.

use romgate::directory::memory::{MemoryFiles, MemoryHistory, MemorySubscriptions, MemoryUsers};
use romgate::directory::{AccountStatus, StoredFile, Subscription, User};
use romgate::store::memory::MemoryStore;
use romgate::{
    Admission, AdmissionManager, Directories, GateConfig, RequestContext, SystemClock,
};
use std::sync::Arc;

fn main() {
    // Signing seed from deployment secrets (this CAN come from environment)
    let seed = std::env::var("TOKEN_SIGNING_SEED").expect("Set TOKEN_SIGNING_SEED");

    let config = GateConfig {
        signing_seed_hex: seed,
        ..GateConfig::default()
    };

    // One seeded member with an active subscription and one firmware file.
    let users = Arc::new(MemoryUsers::new());
    users.upsert(User {
        id: "user-1".to_string(),
        email: "pat@example.com".to_string(),
        display_name: "Pat".to_string(),
        role: "member".to_string(),
        status: AccountStatus::Active,
        remember_token: Some("demo-remember-token".to_string()),
    });

    let subscriptions = Arc::new(MemorySubscriptions::new());
    subscriptions.upsert(Subscription {
        id: "sub-1".to_string(),
        user_id: "user-1".to_string(),
        is_active: true,
        downloads_used_today: 0,
        downloads_used_month: 0,
        bandwidth_used_bytes: 0,
        daily_limit: 10,
        monthly_limit: 100,
        monthly_bandwidth_limit_bytes: 5_000_000_000,
        bandwidth_reset_date: chrono::Utc::now() + chrono::Duration::days(30),
    });

    let files = Arc::new(MemoryFiles::new());
    files.upsert(StoredFile {
        id: "fw-240".to_string(),
        size_bytes: 48_000_000,
        external_url: "https://cdn.example.com/firmware/fw-240.bin".to_string(),
        download_count: 0,
    });

    let store = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
    let manager = match AdmissionManager::new(
        config,
        store,
        Directories {
            users,
            subscriptions,
            files,
            history: Arc::new(MemoryHistory::new()),
        },
    ) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // A download request authenticated by the remember cookie.
    let request = RequestContext {
        route: "downloads.create".to_string(),
        client_ip: "203.0.113.9".to_string(),
        original_url: "/files/fw-240/download".to_string(),
        user_agent: "demo/1.0".to_string(),
        session_id: None,
        remember_token: Some("demo-remember-token".to_string()),
        wants_json: false,
        download_file_id: Some("fw-240".to_string()),
    };

    match manager.admit(&request) {
        Admission::Proceed {
            session,
            rate,
            grant,
            ..
        } => {
            println!("✓ Admitted {} ({})", session.display_name, session.email);
            if let Some(rate) = rate {
                println!("  Rate budget: {}/{} remaining", rate.remaining, rate.limit);
            }
            if let Some(grant) = grant {
                println!("  Download granted: {}", grant.token.target_url);
                println!("  Token expires: {}", grant.token.expires_at);
                println!(
                    "  Bandwidth left: {} bytes",
                    grant.subscription.remaining_bandwidth()
                );
            }
        }
        Admission::Redirect { location, flash } => {
            println!("→ Redirect to {} ({})", location, flash.unwrap_or_default());
        }
        Admission::Json { status, body } => {
            println!("✗ {}: {}", status, body);
        }
    }
}
