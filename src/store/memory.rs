use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::CredentialStore;
use crate::models::{Credential, CredentialKind, NewCredential, ScopedPermissions};

/// DashMap-backed store. Used by tests and when no database is configured;
/// contents do not survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    by_id: DashMap<Uuid, Credential>,
    /// digest -> id
    by_digest: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, new: NewCredential) -> anyhow::Result<Credential> {
        match self.by_digest.entry(new.digest.clone()) {
            Entry::Occupied(_) => anyhow::bail!("credential digest already exists"),
            Entry::Vacant(slot) => {
                slot.insert(new.id);
            }
        }
        let cred = new.into_credential();
        self.by_id.insert(cred.id, cred.clone());
        Ok(cred)
    }

    async fn find_by_digest(&self, digest: &str) -> anyhow::Result<Option<Credential>> {
        let Some(id) = self.by_digest.get(digest).map(|r| *r) else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|c| c.value().clone()))
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> anyhow::Result<Option<Credential>> {
        Ok(self
            .by_id
            .get(&id)
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.value().clone()))
    }

    async fn list_by_owner(&self, owner_id: &str) -> anyhow::Result<Vec<Credential>> {
        let mut out: Vec<Credential> = self
            .by_id
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn revoke(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool> {
        let Some(mut cred) = self.by_id.get_mut(&id) else {
            return Ok(false);
        };
        if cred.owner_id != owner_id || cred.revoked_at.is_some() {
            return Ok(false);
        }
        cred.revoked_at = Some(Utc::now());
        Ok(true)
    }

    async fn update_permissions(
        &self,
        id: Uuid,
        owner_id: &str,
        permissions: &ScopedPermissions,
    ) -> anyhow::Result<bool> {
        let Some(mut cred) = self.by_id.get_mut(&id) else {
            return Ok(false);
        };
        if cred.owner_id != owner_id || cred.kind != CredentialKind::Scoped {
            return Ok(false);
        }
        cred.permissions = Some(permissions.clone());
        Ok(true)
    }

    async fn delete(&self, id: Uuid, owner_id: &str) -> anyhow::Result<bool> {
        match self.by_id.remove_if(&id, |_, c| c.owner_id == owner_id) {
            Some((_, cred)) => {
                self.by_digest.remove(&cred.digest);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn touch_last_used(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut cred) = self.by_id.get_mut(&id) {
            cred.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_cred(owner: &str, digest: &str, kind: CredentialKind) -> NewCredential {
        NewCredential {
            id: Uuid::new_v4(),
            owner_id: owner.into(),
            name: "n".into(),
            prefix: crate::keys::prefix_for(kind).into(),
            digest: digest.into(),
            hint: "abcd".into(),
            kind,
            rate_limit: 5,
            created_at: Utc::now(),
            permissions: match kind {
                CredentialKind::Scoped => Some(ScopedPermissions::default()),
                CredentialKind::General => None,
            },
        }
    }

    #[tokio::test]
    async fn test_duplicate_digest_rejected() {
        let store = MemoryStore::new();
        store.insert(new_cred("a", "d1", CredentialKind::General)).await.unwrap();
        assert!(store.insert(new_cred("b", "d1", CredentialKind::General)).await.is_err());
    }

    #[tokio::test]
    async fn test_owner_isolation() {
        let store = MemoryStore::new();
        let mine = store.insert(new_cred("alice", "d1", CredentialKind::Scoped)).await.unwrap();
        store.insert(new_cred("bob", "d2", CredentialKind::General)).await.unwrap();

        assert!(store.find_by_owner_and_id("bob", mine.id).await.unwrap().is_none());
        assert!(store.find_by_owner_and_id("alice", mine.id).await.unwrap().is_some());

        let listed = store.list_by_owner("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);

        assert!(!store.revoke(mine.id, "bob").await.unwrap());
        assert!(!store
            .update_permissions(mine.id, "bob", &ScopedPermissions::default())
            .await
            .unwrap());
        assert!(!store.delete(mine.id, "bob").await.unwrap());
        assert!(store.find_by_digest("d1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = MemoryStore::new();
        let c = store.insert(new_cred("a", "d1", CredentialKind::General)).await.unwrap();
        assert!(store.revoke(c.id, "a").await.unwrap());
        assert!(!store.revoke(c.id, "a").await.unwrap());

        let found = store.find_by_digest("d1").await.unwrap().unwrap();
        assert!(found.is_revoked());
    }

    #[tokio::test]
    async fn test_update_permissions_only_for_scoped() {
        let store = MemoryStore::new();
        let general = store.insert(new_cred("a", "d1", CredentialKind::General)).await.unwrap();
        let scoped = store.insert(new_cred("a", "d2", CredentialKind::Scoped)).await.unwrap();
        let perms = ScopedPermissions {
            allowed_models: vec!["gpt-4o".into()],
            ..Default::default()
        };

        assert!(!store.update_permissions(general.id, "a", &perms).await.unwrap());
        assert!(store.update_permissions(scoped.id, "a", &perms).await.unwrap());

        let found = store.find_by_digest("d2").await.unwrap().unwrap();
        assert_eq!(found.permissions, Some(perms));
        let general = store.find_by_digest("d1").await.unwrap().unwrap();
        assert!(general.permissions.is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_digest_index() {
        let store = MemoryStore::new();
        let c = store.insert(new_cred("a", "d1", CredentialKind::Scoped)).await.unwrap();
        assert!(store.delete(c.id, "a").await.unwrap());
        assert!(store.find_by_digest("d1").await.unwrap().is_none());
        assert!(!store.delete(c.id, "a").await.unwrap());
        // digest is free again
        store.insert(new_cred("a", "d1", CredentialKind::General)).await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_last_used() {
        let store = MemoryStore::new();
        let c = store.insert(new_cred("a", "d1", CredentialKind::General)).await.unwrap();
        assert!(c.last_used_at.is_none());
        let now = Utc::now();
        store.touch_last_used(c.id, now).await.unwrap();
        let found = store.find_by_digest("d1").await.unwrap().unwrap();
        assert_eq!(found.last_used_at, Some(now));
        // unknown ids are ignored
        store.touch_last_used(Uuid::new_v4(), now).await.unwrap();
    }
}
