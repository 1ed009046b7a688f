//! Credential records and their scoped-permission sub-records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two credential families. The prefix of a secret tells them apart
/// without a lookup; see [`crate::keys::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    /// Unrestricted server-side credential.
    General,
    /// Client-side credential bound to an allow-list.
    Scoped,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::General => "general",
            CredentialKind::Scoped => "scoped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "general" => Some(CredentialKind::General),
            "scoped" => Some(CredentialKind::Scoped),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allow-lists for a scoped credential.
///
/// An empty list leaves that dimension unrestricted. A non-empty list must
/// contain the requested value or the `*` wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedPermissions {
    #[serde(default)]
    pub allowed_agents: Vec<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub allowed_models: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// A stored credential. The plaintext secret is never part of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing, default)]
    pub digest: String,
    pub hint: String,
    #[serde(rename = "type")]
    pub kind: CredentialKind,
    pub rate_limit: u32,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Present iff `kind == Scoped`.
    pub permissions: Option<ScopedPermissions>,
}

impl Credential {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Allow-lists to consult, or `None` for general credentials.
    pub fn scope(&self) -> Option<&ScopedPermissions> {
        match self.kind {
            CredentialKind::General => None,
            CredentialKind::Scoped => self.permissions.as_ref(),
        }
    }
}

/// Everything a store needs to persist a freshly issued credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub prefix: String,
    pub digest: String,
    pub hint: String,
    pub kind: CredentialKind,
    pub rate_limit: u32,
    pub created_at: DateTime<Utc>,
    pub permissions: Option<ScopedPermissions>,
}

impl NewCredential {
    pub fn into_credential(self) -> Credential {
        Credential {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            prefix: self.prefix,
            digest: self.digest,
            hint: self.hint,
            kind: self.kind,
            rate_limit: self.rate_limit,
            created_at: self.created_at,
            last_used_at: None,
            revoked_at: None,
            permissions: self.permissions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in [CredentialKind::General, CredentialKind::Scoped] {
            assert_eq!(CredentialKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(CredentialKind::parse("admin"), None);
    }

    #[test]
    fn test_permissions_default_fields_on_deserialize() {
        let perms: ScopedPermissions =
            serde_json::from_str(r#"{"allowed_tools":["search"]}"#).unwrap();
        assert_eq!(perms.allowed_tools, vec!["search"]);
        assert!(perms.allowed_agents.is_empty());
        assert!(perms.allowed_domains.is_empty());
    }

    #[test]
    fn test_digest_is_not_serialized() {
        let cred = NewCredential {
            id: Uuid::new_v4(),
            owner_id: "user-1".into(),
            name: "ci".into(),
            prefix: "sk_".into(),
            digest: "deadbeef".into(),
            hint: "abcd".into(),
            kind: CredentialKind::General,
            rate_limit: 60,
            created_at: Utc::now(),
            permissions: None,
        }
        .into_credential();

        let json = serde_json::to_value(&cred).unwrap();
        assert!(json.get("digest").is_none());
        assert_eq!(json["type"], "general");
        assert_eq!(json["hint"], "abcd");
    }

    #[test]
    fn test_general_credential_never_exposes_scope() {
        let mut cred = NewCredential {
            id: Uuid::new_v4(),
            owner_id: "user-1".into(),
            name: "server".into(),
            prefix: "sk_".into(),
            digest: "00".into(),
            hint: "wxyz".into(),
            kind: CredentialKind::General,
            rate_limit: 60,
            created_at: Utc::now(),
            permissions: None,
        }
        .into_credential();
        // Even if a stale sub-record were attached, general ignores it.
        cred.permissions = Some(ScopedPermissions::default());
        assert!(cred.scope().is_none());
    }
}
