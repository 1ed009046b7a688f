//! Data-plane endpoints. Every route here sits behind
//! [`crate::middleware::gate::require_credential`], so an [`AuthResult`]
//! is always present in the request extensions.

use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::AppJson;
use crate::errors::AppError;
use crate::middleware::gate::AuthResult;
use crate::middleware::permissions::{check_agent, check_model, check_tool};
use crate::models::{CredentialKind, ScopedPermissions};

#[derive(Debug, Serialize)]
pub struct AuthSummary {
    pub valid: bool,
    pub credential_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<ScopedPermissions>,
}

impl From<&AuthResult> for AuthSummary {
    fn from(auth: &AuthResult) -> Self {
        Self {
            valid: auth.valid,
            credential_id: auth.credential.id,
            name: auth.credential.name.clone(),
            kind: auth.credential.kind,
            limit: auth.limit,
            remaining: auth.remaining,
            reset_at: auth.reset_at,
            permissions: auth.credential.scope().cloned(),
        }
    }
}

/// Capabilities a caller wants to exercise on this request.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub agent: Option<String>,
    pub tool: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub allowed: bool,
    pub credential_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub remaining: u32,
}

/// GET /v1/auth: describe the credential that authorized this request
pub async fn current_auth(Extension(auth): Extension<AuthResult>) -> Json<AuthSummary> {
    Json(AuthSummary::from(&auth))
}

/// POST /v1/authorize: check agent, tool and model against the
/// credential's allow-lists. Fields left out are not checked.
pub async fn authorize_capabilities(
    Extension(auth): Extension<AuthResult>,
    AppJson(req): AppJson<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let cred = &auth.credential;

    if let Some(agent) = req.agent.as_deref() {
        check_agent(cred, agent)?;
    }
    if let Some(tool) = req.tool.as_deref() {
        check_tool(cred, tool)?;
    }
    if let Some(model) = req.model.as_deref() {
        check_model(cred, model)?;
    }

    tracing::debug!(
        credential_id = %cred.id,
        agent = ?req.agent,
        tool = ?req.tool,
        model = ?req.model,
        "capabilities allowed"
    );

    Ok(Json(AuthorizeResponse {
        allowed: true,
        credential_id: cred.id,
        agent: req.agent,
        tool: req.tool,
        model: req.model,
        remaining: auth.remaining,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Credential, NewCredential};
    use chrono::Utc;

    fn auth_for(kind: CredentialKind, permissions: Option<ScopedPermissions>) -> AuthResult {
        let credential: Credential = NewCredential {
            id: Uuid::new_v4(),
            owner_id: "owner-1".into(),
            name: "docs-bot".into(),
            prefix: crate::keys::prefix_for(kind).into(),
            digest: "00".into(),
            hint: "abcd".into(),
            kind,
            rate_limit: 10,
            created_at: Utc::now(),
            permissions,
        }
        .into_credential();
        AuthResult {
            valid: true,
            credential,
            limit: 10,
            remaining: 9,
            reset_at: 1_714_557_660,
        }
    }

    #[tokio::test]
    async fn test_authorize_scoped_denies_unlisted_tool() {
        let auth = auth_for(
            CredentialKind::Scoped,
            Some(ScopedPermissions {
                allowed_tools: vec!["search".into()],
                ..Default::default()
            }),
        );

        let ok = authorize_capabilities(
            Extension(auth.clone()),
            AppJson(AuthorizeRequest {
                tool: Some("search".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert!(ok.0.allowed);

        let err = authorize_capabilities(
            Extension(auth),
            AppJson(AuthorizeRequest {
                tool: Some("shell".into()),
                ..Default::default()
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::InsufficientPermissions { .. }));
    }

    #[tokio::test]
    async fn test_general_credential_allows_everything() {
        let auth = auth_for(CredentialKind::General, None);
        let res = authorize_capabilities(
            Extension(auth),
            AppJson(AuthorizeRequest {
                agent: Some("any-agent".into()),
                tool: Some("any-tool".into()),
                model: Some("any-model".into()),
            }),
        )
        .await
        .unwrap();
        assert!(res.0.allowed);
        assert_eq!(res.0.remaining, 9);
    }

    #[tokio::test]
    async fn test_summary_hides_permissions_for_general() {
        let auth = auth_for(CredentialKind::General, None);
        let Json(summary) = current_auth(Extension(auth)).await;
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["type"], "general");
        assert!(json.get("permissions").is_none());
        assert_eq!(json["reset_at"], 1_714_557_660);
    }
}
