use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::api::extract::AppJson;
use crate::auth::session::{SessionPayload, SESSION_TTL_SECS};
use crate::errors::AppError;
use crate::models::{Credential, CredentialKind, ScopedPermissions};
use crate::store::{self, CreateCredential, CredentialStore};
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Serialize)]
pub struct CreateCredentialResponse {
    #[serde(flatten)]
    pub credential: Credential,
    /// Plaintext secret. Shown once, never again.
    pub secret: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct RevokeResponse {
    pub id: Uuid,
    pub revoked: bool,
}

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub principal_id: String,
}

#[derive(Serialize)]
pub struct CreateSessionResponse {
    pub token: String,
    pub principal_id: String,
    pub expires_at: i64,
}

fn parse_id(id_str: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id_str).map_err(|_| {
        tracing::debug!("invalid credential id: {}", id_str);
        AppError::NotFound
    })
}

// ── Handlers ─────────────────────────────────────────────────

/// GET /api/v1/credentials: list the caller's credentials
pub async fn list_credentials(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
) -> Result<Json<Vec<Credential>>, AppError> {
    let creds = state.store.list_by_owner(&session.principal_id).await?;
    Ok(Json(creds))
}

/// POST /api/v1/credentials: issue a new credential
pub async fn create_credential(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
    AppJson(payload): AppJson<CreateCredential>,
) -> Result<(StatusCode, Json<CreateCredentialResponse>), AppError> {
    let created = store::create_credential(
        state.store.as_ref(),
        &session.principal_id,
        payload,
        state.config.default_rate_limit,
    )
    .await?;

    let secret = created.secret.expose().to_string();
    Ok((
        StatusCode::CREATED,
        Json(CreateCredentialResponse {
            credential: created.credential,
            message: format!("Use: Authorization: Bearer {}", secret),
            secret,
        }),
    ))
}

/// GET /api/v1/credentials/:id
pub async fn get_credential(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
    Path(id_str): Path<String>,
) -> Result<Json<Credential>, AppError> {
    let id = parse_id(&id_str)?;
    let cred = state
        .store
        .find_by_owner_and_id(&session.principal_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(cred))
}

/// PATCH /api/v1/credentials/:id: replace the allow-lists of a scoped credential
pub async fn update_permissions(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
    Path(id_str): Path<String>,
    AppJson(permissions): AppJson<ScopedPermissions>,
) -> Result<Json<Credential>, AppError> {
    let id = parse_id(&id_str)?;
    let owner = session.principal_id.as_str();

    let cred = state
        .store
        .find_by_owner_and_id(owner, id)
        .await?
        .ok_or(AppError::NotFound)?;

    match cred.kind {
        CredentialKind::General => {
            return Err(AppError::InvalidOperation(
                "permissions only apply to scoped credentials".into(),
            ))
        }
        CredentialKind::Scoped => {}
    }

    if !state.store.update_permissions(id, owner, &permissions).await? {
        // deleted between the read and the write
        return Err(AppError::NotFound);
    }
    tracing::info!(credential_id = %id, owner_id = owner, "permissions updated");

    let updated = state
        .store
        .find_by_owner_and_id(owner, id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(updated))
}

/// POST /api/v1/credentials/:id/revoke: permanent; `revoked: false` when
/// it was already revoked
pub async fn revoke_credential(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
    Path(id_str): Path<String>,
) -> Result<Json<RevokeResponse>, AppError> {
    let id = parse_id(&id_str)?;
    let owner = session.principal_id.as_str();

    if state.store.find_by_owner_and_id(owner, id).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let revoked = state.store.revoke(id, owner).await?;
    if revoked {
        tracing::info!(credential_id = %id, owner_id = owner, "credential revoked");
    }
    Ok(Json(RevokeResponse { id, revoked }))
}

/// DELETE /api/v1/credentials/:id: hard delete
pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionPayload>,
    Path(id_str): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id_str)?;
    if !state.store.delete(id, &session.principal_id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(credential_id = %id, owner_id = %session.principal_id, "credential deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/session: mint a dashboard session for a principal.
/// Guarded by `X-Admin-Key`; disabled when no admin key is configured.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AppJson(payload): AppJson<CreateSessionRequest>,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.admin_key.as_deref() else {
        tracing::debug!("session bootstrap requested but KEYGATE_ADMIN_KEY is unset");
        return Err(AppError::NotFound);
    };

    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::warn!("session bootstrap: invalid admin key");
        return Err(AppError::Unauthorized);
    }

    let principal_id = payload.principal_id.trim();
    if principal_id.is_empty() {
        return Err(AppError::ValidationError(
            "principal_id must not be empty".into(),
        ));
    }

    let token = state.sessions.issue(principal_id)?;
    let session = state
        .sessions
        .verify(&token)
        .ok_or_else(|| anyhow::anyhow!("freshly issued session failed verification"))?;

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={}",
        state.config.session_cookie, token, SESSION_TTL_SECS
    );
    let cookie = HeaderValue::from_str(&cookie).map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(principal_id = principal_id, "session issued");

    let mut response = (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            token,
            principal_id: session.principal_id,
            expires_at: session.expires_at,
        }),
    )
        .into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(response)
}
