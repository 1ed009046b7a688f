pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::keys::{self, IssuedSecret};
use crate::models::{Credential, CredentialKind, NewCredential, ScopedPermissions};

const MAX_NAME_LEN: usize = 100;
/// Largest limit the Postgres `INTEGER` column can hold.
pub const MAX_RATE_LIMIT: u32 = i32::MAX as u32;

/// Persistence port for credentials and their scoped permissions.
///
/// Every owner-scoped operation must treat a record belonging to another
/// owner exactly like a missing one.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist a new record. Fails if the digest already exists.
    async fn insert(&self, new: NewCredential) -> anyhow::Result<Credential>;

    /// Lookup by precomputed digest, permissions joined in.
    async fn find_by_digest(&self, digest: &str) -> anyhow::Result<Option<Credential>>;

    async fn find_by_owner_and_id(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>>;

    /// Newest first.
    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Credential>>;

    /// `false` if not found, not owned, or already revoked.
    async fn revoke(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool>;

    /// `false` if not found, not owned, or not a scoped credential.
    async fn update_permissions(
        &self,
        id: Uuid,
        owner_id: &str,
        permissions: &ScopedPermissions,
    ) -> anyhow::Result<bool>;

    /// Hard delete, permissions included.
    async fn delete(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool>;

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;
}

/// Issuance request, as accepted by the management API and the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCredential {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    #[serde(default)]
    pub permissions: Option<ScopedPermissions>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

/// A stored record plus the plaintext secret. The secret is not
/// recoverable after this value is dropped.
#[derive(Debug)]
pub struct CreatedCredential {
    pub credential: Credential,
    pub secret: IssuedSecret,
}

/// Validate a request, generate a secret and persist its digest.
pub async fn create_credential(
    store: &dyn CredentialStore,
    owner_id: &str,
    req: CreateCredential,
    default_rate_limit: u32,
) -> Result<CreatedCredential, AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::ValidationError("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(AppError::ValidationError(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }

    let rate_limit = req.rate_limit.unwrap_or(default_rate_limit);
    if rate_limit == 0 {
        return Err(AppError::ValidationError(
            "rate_limit must be at least 1".into(),
        ));
    }
    if rate_limit > MAX_RATE_LIMIT {
        return Err(AppError::ValidationError(format!(
            "rate_limit must be at most {}",
            MAX_RATE_LIMIT
        )));
    }

    let permissions = match req.kind {
        CredentialKind::Scoped => match req.permissions {
            Some(p) => Some(p),
            None => {
                return Err(AppError::ValidationError(
                    "scoped credentials require a permissions object".into(),
                ))
            }
        },
        CredentialKind::General => {
            if req.permissions.is_some() {
                tracing::debug!("ignoring permissions on general credential");
            }
            None
        }
    };

    let secret = keys::issue(req.kind);
    let new = NewCredential {
        id: Uuid::new_v4(),
        owner_id: owner_id.to_string(),
        name: name.to_string(),
        prefix: keys::prefix_for(req.kind).to_string(),
        digest: secret.digest(),
        hint: secret.hint(),
        kind: req.kind,
        rate_limit,
        created_at: Utc::now(),
        permissions,
    };

    let credential = store.insert(new).await?;
    tracing::info!(
        credential_id = %credential.id,
        owner_id = owner_id,
        kind = %credential.kind,
        hint = %credential.hint,
        "credential issued"
    );

    Ok(CreatedCredential { credential, secret })
}
