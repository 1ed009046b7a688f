//! Keygate: credential issuance and per-request authorization for agent
//! traffic.
//!
//! The binary in `main.rs` and the integration tests in `tests/` both
//! build on this library.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod keys;
pub mod middleware;
pub mod models;
pub mod store;

use auth::SessionManager;
use jobs::last_used::LastUsedRecorder;
use middleware::gate::AuthorizationGate;
use middleware::rate_limit::{MemoryRateLimiter, RateLimiter};
use store::memory::MemoryStore;
use store::postgres::PgStore;
use store::CredentialStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub gate: AuthorizationGate,
    pub sessions: SessionManager,
    pub config: config::Config,
    /// Set when running against Postgres; used by `/readyz`.
    pub db: Option<PgStore>,
}

impl AppState {
    /// Wire the gate and spawn the last-used writer. Needs a Tokio runtime.
    pub fn new(
        config: config::Config,
        store: Arc<dyn CredentialStore>,
        limiter: Arc<dyn RateLimiter>,
        db: Option<PgStore>,
    ) -> anyhow::Result<Arc<Self>> {
        let sessions = SessionManager::new(config.session_secret.as_bytes())?;
        let last_used = LastUsedRecorder::spawn(store.clone(), config.last_used_queue);
        let gate = AuthorizationGate::new(store.clone(), limiter.clone(), last_used);

        Ok(Arc::new(Self {
            store,
            limiter,
            gate,
            sessions,
            config,
            db,
        }))
    }

    /// State backed by the in-memory store and limiter.
    pub fn in_memory(config: config::Config) -> anyhow::Result<Arc<Self>> {
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRateLimiter::new()),
            None,
        )
    }

    /// State backed by Postgres for both credentials and rate-limit windows.
    pub fn postgres(config: config::Config, db: PgStore) -> anyhow::Result<Arc<Self>> {
        let shared = Arc::new(db.clone());
        Self::new(config, shared.clone(), shared, Some(db))
    }
}
