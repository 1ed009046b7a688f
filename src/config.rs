use serde::Deserialize;

const PLACEHOLDER_SESSION_SECRET: &str = "CHANGE_ME_SESSION_SECRET_AT_LEAST_32_BYTES";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Postgres connection string. Without it credentials live in memory.
    pub database_url: Option<String>,
    /// HMAC key for dashboard session tokens.
    pub session_secret: String,
    /// Key accepted by `POST /auth/session`. Session bootstrap is disabled
    /// when unset.
    pub admin_key: Option<String>,
    /// Requests per minute for new credentials that don't specify one.
    /// Set via KEYGATE_DEFAULT_RPM. Default: 60.
    pub default_rate_limit: u32,
    /// Cookie carrying the session token on the management surface.
    pub session_cookie: String,
    /// Allowed CORS origin for the management dashboard.
    pub dashboard_origin: String,
    /// Capacity of the deferred last-used update queue.
    pub last_used_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: None,
            session_secret: PLACEHOLDER_SESSION_SECRET.into(),
            admin_key: None,
            default_rate_limit: 60,
            session_cookie: "keygate_session".into(),
            dashboard_origin: "http://localhost:3000".into(),
            last_used_queue: 1024,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let session_secret = std::env::var("KEYGATE_SESSION_SECRET")
        .unwrap_or_else(|_| PLACEHOLDER_SESSION_SECRET.into());

    if session_secret == PLACEHOLDER_SESSION_SECRET {
        let env_mode = std::env::var("KEYGATE_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "KEYGATE_SESSION_SECRET is still the insecure placeholder. \
                 Set a random secret of at least 32 bytes before running in production."
            );
        }
        tracing::warn!("KEYGATE_SESSION_SECRET is not set, using insecure placeholder");
    }

    Ok(Config {
        port: std::env::var("KEYGATE_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty()),
        session_secret,
        admin_key: std::env::var("KEYGATE_ADMIN_KEY")
            .ok()
            .filter(|s| !s.is_empty()),
        default_rate_limit: std::env::var("KEYGATE_DEFAULT_RPM")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0 && *v <= crate::store::MAX_RATE_LIMIT)
            .unwrap_or(defaults.default_rate_limit),
        session_cookie: std::env::var("KEYGATE_SESSION_COOKIE")
            .unwrap_or(defaults.session_cookie),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or(defaults.dashboard_origin),
        last_used_queue: std::env::var("KEYGATE_LAST_USED_QUEUE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.last_used_queue),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_secret_is_long_enough_for_dev() {
        let cfg = Config::default();
        assert!(cfg.session_secret.len() >= crate::auth::session::MIN_SECRET_LEN);
        assert!(cfg.default_rate_limit > 0);
    }
}
