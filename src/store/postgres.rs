use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::CredentialStore;
use crate::middleware::rate_limit::{window_start, RateLimiter, RETENTION_SECS};
use crate::models::{Credential, CredentialKind, NewCredential, ScopedPermissions};

const SELECT_CREDENTIAL: &str = r#"
    SELECT c.id, c.owner_id, c.name, c.prefix, c.digest, c.hint, c.kind, c.rate_limit,
           c.created_at, c.last_used_at, c.revoked_at,
           (sp.credential_id IS NOT NULL) AS has_permissions,
           sp.allowed_agents, sp.allowed_tools, sp.allowed_models, sp.allowed_domains
    FROM credentials c
    LEFT JOIN scoped_permissions sp ON sp.credential_id = c.id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub prefix: String,
    pub digest: String,
    pub hint: String,
    pub kind: String,
    pub rate_limit: i32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub has_permissions: bool,
    pub allowed_agents: Option<Vec<String>>,
    pub allowed_tools: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub allowed_domains: Option<Vec<String>>,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = anyhow::Error;

    fn try_from(row: CredentialRow) -> anyhow::Result<Self> {
        let kind = CredentialKind::parse(&row.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown credential kind '{}'", row.kind))?;

        let permissions = match kind {
            CredentialKind::Scoped if row.has_permissions => Some(ScopedPermissions {
                allowed_agents: row.allowed_agents.unwrap_or_default(),
                allowed_tools: row.allowed_tools.unwrap_or_default(),
                allowed_models: row.allowed_models.unwrap_or_default(),
                allowed_domains: row.allowed_domains.unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Credential {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            prefix: row.prefix,
            digest: row.digest,
            hint: row.hint,
            kind,
            rate_limit: u32::try_from(row.rate_limit)
                .map_err(|_| anyhow::anyhow!("negative rate limit {}", row.rate_limit))?,
            created_at: row.created_at,
            last_used_at: row.last_used_at,
            revoked_at: row.revoked_at,
            permissions,
        })
    }
}

fn limit_to_db(limit: u32) -> anyhow::Result<i32> {
    i32::try_from(limit)
        .map_err(|_| anyhow::anyhow!("rate limit {} does not fit the rate_limit column", limit))
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn insert(&self, new: NewCredential) -> anyhow::Result<Credential> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO credentials (id, owner_id, name, prefix, digest, hint, kind, rate_limit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(new.id)
        .bind(&new.owner_id)
        .bind(&new.name)
        .bind(&new.prefix)
        .bind(&new.digest)
        .bind(&new.hint)
        .bind(new.kind.as_str())
        .bind(limit_to_db(new.rate_limit)?)
        .bind(new.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(p) = &new.permissions {
            sqlx::query(
                r#"
                INSERT INTO scoped_permissions
                    (credential_id, allowed_agents, allowed_tools, allowed_models, allowed_domains)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(new.id)
            .bind(&p.allowed_agents)
            .bind(&p.allowed_tools)
            .bind(&p.allowed_models)
            .bind(&p.allowed_domains)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(new.into_credential())
    }

    async fn find_by_digest(&self, digest: &str) -> anyhow::Result<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "{} WHERE c.digest = $1",
            SELECT_CREDENTIAL
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Credential::try_from).transpose()
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "{} WHERE c.id = $1 AND c.owner_id = $2",
            SELECT_CREDENTIAL
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Credential::try_from).transpose()
    }

    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Credential>> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "{} WHERE c.owner_id = $1 ORDER BY c.created_at DESC",
            SELECT_CREDENTIAL
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Credential::try_from).collect()
    }

    async fn revoke(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE credentials SET revoked_at = NOW()
            WHERE id = $1 AND owner_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_permissions(
        &self,
        id: Uuid,
        owner_id: &str,
        permissions: &ScopedPermissions,
    ) -> anyhow::Result<bool> {
        // The SELECT yields no row for general or foreign credentials.
        let result = sqlx::query(
            r#"
            INSERT INTO scoped_permissions
                (credential_id, allowed_agents, allowed_tools, allowed_models, allowed_domains)
            SELECT id, $3, $4, $5, $6 FROM credentials
            WHERE id = $1 AND owner_id = $2 AND kind = 'scoped'
            ON CONFLICT (credential_id) DO UPDATE SET
                allowed_agents = EXCLUDED.allowed_agents,
                allowed_tools = EXCLUDED.allowed_tools,
                allowed_models = EXCLUDED.allowed_models,
                allowed_domains = EXCLUDED.allowed_domains
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(&permissions.allowed_agents)
        .bind(&permissions.allowed_tools)
        .bind(&permissions.allowed_models)
        .bind(&permissions.allowed_domains)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM credentials WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query("UPDATE credentials SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for PgStore {
    async fn check_and_increment(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        // Single statement: the conflict path takes a row lock, and the
        // WHERE clause suppresses the update (and the RETURNING row) once
        // the window is full.
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_entries (credential_id, window_start, request_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (credential_id, window_start) DO UPDATE
                SET request_count = rate_limit_entries.request_count + 1
                WHERE rate_limit_entries.request_count < $3
            RETURNING request_count
            "#,
        )
        .bind(credential_id)
        .bind(window_start(now))
        .bind(limit_to_db(limit)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count.is_some())
    }

    async fn remaining(
        &self,
        credential_id: Uuid,
        limit: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<u32> {
        let count: Option<i32> = sqlx::query_scalar(
            "SELECT request_count FROM rate_limit_entries WHERE credential_id = $1 AND window_start = $2",
        )
        .bind(credential_id)
        .bind(window_start(now))
        .fetch_optional(&self.pool)
        .await?;

        let used = count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0);
        Ok(limit.saturating_sub(used))
    }

    async fn purge_stale(&self, now: DateTime<Utc>) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_entries WHERE window_start < $1")
            .bind(now.timestamp() - RETENTION_SECS)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
