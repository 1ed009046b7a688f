//! Per-request credential authorization.
//!
//! Steps, terminal on the first failure:
//! 1. `Authorization` header present
//! 2. `Bearer <token>` shape
//! 3. token shape matches a known credential type
//! 4. digest lookup
//! 5. not revoked
//! 6. rate limit
//! 7. origin allow-list (scoped credentials with domains only)
//!
//! Agent/tool/model checks are left to handlers; see
//! [`crate::middleware::permissions`].

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::{AppError, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET};
use crate::jobs::last_used::LastUsedRecorder;
use crate::keys;
use crate::middleware::permissions::{domain_allowed, origin_host};
use crate::middleware::rate_limit::{next_reset, RateLimiter};
use crate::models::{Credential, CredentialKind};
use crate::store::CredentialStore;
use crate::AppState;

/// The gate's decision, stored in request extensions for handlers.
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub valid: bool,
    pub credential: Credential,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds of the next window boundary.
    pub reset_at: i64,
}

#[derive(Clone)]
pub struct AuthorizationGate {
    store: Arc<dyn CredentialStore>,
    limiter: Arc<dyn RateLimiter>,
    last_used: LastUsedRecorder,
}

impl AuthorizationGate {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        limiter: Arc<dyn RateLimiter>,
        last_used: LastUsedRecorder,
    ) -> Self {
        Self {
            store,
            limiter,
            last_used,
        }
    }

    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthResult, AppError> {
        self.authorize_at(headers, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<AuthResult, AppError> {
        let token = extract_bearer(headers)?;

        let Some(kind) = keys::classify(token) else {
            tracing::debug!("rejected credential with unrecognised shape");
            return Err(AppError::InvalidCredential);
        };

        // No caching: a revocation must be visible to the very next lookup.
        let credential = self
            .store
            .find_by_digest(&keys::digest(token))
            .await?
            .ok_or(AppError::InvalidCredential)?;

        if credential.is_revoked() {
            tracing::info!(credential_id = %credential.id, "revoked credential presented");
            return Err(AppError::InvalidCredential);
        }
        if credential.kind != kind {
            // Digest matched but the prefix disagrees with the record.
            tracing::error!(credential_id = %credential.id, "credential kind does not match prefix");
            return Err(AppError::InvalidCredential);
        }

        let limit = credential.rate_limit;
        let reset_at = next_reset(now);
        if !self
            .limiter
            .check_and_increment(credential.id, limit, now)
            .await?
        {
            tracing::info!(
                credential_id = %credential.id,
                limit,
                "rate limit exceeded"
            );
            return Err(AppError::RateLimitExceeded { limit, reset_at });
        }

        match credential.kind {
            CredentialKind::General => {}
            CredentialKind::Scoped => check_origin(&credential, headers)?,
        }

        let remaining = self.limiter.remaining(credential.id, limit, now).await?;
        self.last_used.record(credential.id, now);

        tracing::debug!(
            credential_id = %credential.id,
            kind = %credential.kind,
            remaining,
            "credential authorized"
        );

        Ok(AuthResult {
            valid: true,
            credential,
            limit,
            remaining,
            reset_at,
        })
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(AppError::MissingCredential)?;
    let value = value.to_str().map_err(|_| AppError::InvalidFormat)?;

    let (scheme, token) = value.trim().split_once(' ').ok_or(AppError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::InvalidFormat);
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AppError::InvalidFormat);
    }
    Ok(token)
}

fn check_origin(credential: &Credential, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(scope) = credential.scope() else {
        return Ok(());
    };
    if scope.allowed_domains.is_empty() {
        return Ok(());
    }

    let raw = headers
        .get(axum::http::header::ORIGIN)
        .or_else(|| headers.get(axum::http::header::REFERER))
        .and_then(|v| v.to_str().ok());

    // A restricted credential with no usable origin is treated as a mismatch.
    match raw.and_then(origin_host) {
        Some(host) if domain_allowed(&scope.allowed_domains, &host) => Ok(()),
        Some(host) => {
            tracing::info!(credential_id = %credential.id, origin = %host, "origin not allowed");
            Err(AppError::DomainNotAllowed { origin: host })
        }
        None => {
            tracing::info!(credential_id = %credential.id, "restricted credential without origin");
            Err(AppError::DomainNotAllowed {
                origin: raw.unwrap_or_default().to_string(),
            })
        }
    }
}

/// Axum middleware: run the gate, stash the [`AuthResult`], and decorate
/// the response with rate-limit headers.
pub async fn require_credential(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let auth = match state.gate.authorize(req.headers()).await {
        Ok(auth) => auth,
        Err(e) => return e.into_response(),
    };

    let limit = auth.limit;
    let remaining = auth.remaining;
    let reset_at = auth.reset_at;
    req.extensions_mut().insert(auth);

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(HEADER_LIMIT, HeaderValue::from(limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(reset_at));
    response
}
