//! Scope checks for scoped credentials.
//!
//! General credentials pass every check without consulting an allow-list.
//! For scoped credentials each dimension is checked independently:
//! - empty list: unrestricted
//! - `"*"` in the list: unrestricted
//! - otherwise the requested value must appear verbatim
//!
//! Domains additionally accept `*.example.com` patterns, which match the
//! apex and any subdomain.

use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::models::{Credential, ScopedPermissions};

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Agent,
    Tool,
    Model,
    Domain,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Capability::Agent => "agent",
            Capability::Tool => "tool",
            Capability::Model => "model",
            Capability::Domain => "domain",
        })
    }
}

pub fn check_tool(cred: &Credential, name: &str) -> Result<(), AppError> {
    check(cred, Capability::Tool, name, |p| &p.allowed_tools)
}

pub fn check_model(cred: &Credential, name: &str) -> Result<(), AppError> {
    check(cred, Capability::Model, name, |p| &p.allowed_models)
}

pub fn check_agent(cred: &Credential, id: &str) -> Result<(), AppError> {
    check(cred, Capability::Agent, id, |p| &p.allowed_agents)
}

fn check(
    cred: &Credential,
    capability: Capability,
    requested: &str,
    list: impl Fn(&ScopedPermissions) -> &Vec<String>,
) -> Result<(), AppError> {
    let Some(scope) = cred.scope() else {
        return Ok(());
    };

    if list_allows(list(scope), requested) {
        return Ok(());
    }

    tracing::info!(
        credential_id = %cred.id,
        capability = %capability,
        requested = requested,
        "scoped credential denied"
    );
    Err(AppError::InsufficientPermissions {
        capability,
        requested: requested.to_string(),
    })
}

/// An empty list allows everything.
pub fn list_allows(allowed: &[String], requested: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|a| a == WILDCARD || a == requested)
}

/// Whether `host` is accepted by a non-empty domain allow-list.
pub fn domain_allowed(allowed: &[String], host: &str) -> bool {
    allowed.iter().any(|pattern| domain_matches(host, pattern))
}

/// Match a bare host against one allow-list entry.
///
/// - `*` matches any host
/// - `*.example.com` matches `example.com` and `a.b.example.com`
/// - anything else is a case-insensitive exact match
pub fn domain_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.trim().trim_end_matches('.').to_ascii_lowercase();

    if pattern == WILDCARD {
        return true;
    }

    if let Some(apex) = pattern.strip_prefix("*.") {
        return host == apex || host.ends_with(&format!(".{}", apex));
    }

    host == pattern
}

/// Extract the host from an `Origin` or `Referer` value.
/// Returns `None` for opaque origins (`null`) and unparseable input.
pub fn origin_host(value: &str) -> Option<String> {
    let url = url::Url::parse(value.trim()).ok()?;
    url.host_str().map(|h| h.to_ascii_lowercase())
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CredentialKind, NewCredential};
    use chrono::Utc;
    use uuid::Uuid;

    fn cred(kind: CredentialKind, permissions: Option<ScopedPermissions>) -> Credential {
        NewCredential {
            id: Uuid::new_v4(),
            owner_id: "owner".into(),
            name: "test".into(),
            prefix: crate::keys::prefix_for(kind).into(),
            digest: "d".into(),
            hint: "hint".into(),
            kind,
            rate_limit: 10,
            created_at: Utc::now(),
            permissions,
        }
        .into_credential()
    }

    fn scoped_tools(tools: &[&str]) -> Credential {
        cred(
            CredentialKind::Scoped,
            Some(ScopedPermissions {
                allowed_tools: tools.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_scoped_tool_allow_list() {
        let c = scoped_tools(&["search"]);
        assert!(check_tool(&c, "search").is_ok());
        let err = check_tool(&c, "email").unwrap_err();
        match err {
            AppError::InsufficientPermissions {
                capability,
                requested,
            } => {
                assert_eq!(capability, Capability::Tool);
                assert_eq!(requested, "email");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_general_passes_everything() {
        let c = cred(CredentialKind::General, None);
        assert!(check_tool(&c, "search").is_ok());
        assert!(check_tool(&c, "email").is_ok());
        assert!(check_model(&c, "gpt-4o").is_ok());
        assert!(check_agent(&c, "agent-7").is_ok());
    }

    #[test]
    fn test_empty_allow_list_is_unrestricted() {
        // Empty means "no restriction", not "deny all". If this test starts
        // failing, the semantics changed and existing keys are affected.
        let c = scoped_tools(&[]);
        assert!(check_tool(&c, "anything").is_ok());
        assert!(check_model(&c, "anything").is_ok());
        assert!(check_agent(&c, "anything").is_ok());
    }

    #[test]
    fn test_wildcard_entry() {
        let c = scoped_tools(&["search", "*"]);
        assert!(check_tool(&c, "email").is_ok());
    }

    #[test]
    fn test_dimensions_are_independent() {
        let c = cred(
            CredentialKind::Scoped,
            Some(ScopedPermissions {
                allowed_models: vec!["gpt-4o".into()],
                allowed_agents: vec!["support-bot".into()],
                ..Default::default()
            }),
        );
        assert!(check_model(&c, "gpt-4o").is_ok());
        assert!(check_model(&c, "gpt-4o-mini").is_err());
        assert!(check_agent(&c, "support-bot").is_ok());
        assert!(check_agent(&c, "sales-bot").is_err());
        assert!(check_tool(&c, "anything").is_ok());
    }

    #[test]
    fn test_exact_match_is_case_sensitive() {
        let c = scoped_tools(&["search"]);
        assert!(check_tool(&c, "Search").is_err());
        assert!(check_tool(&c, "search2").is_err());
    }

    #[test]
    fn test_domain_wildcard_subdomain_and_apex() {
        let allowed = vec!["*.example.com".to_string()];
        assert!(domain_allowed(&allowed, "app.example.com"));
        assert!(domain_allowed(&allowed, "example.com"));
        assert!(domain_allowed(&allowed, "a.b.example.com"));
        assert!(!domain_allowed(&allowed, "evil.com"));
        assert!(!domain_allowed(&allowed, "notexample.com"));
        assert!(!domain_allowed(&allowed, "example.com.evil.com"));
    }

    #[test]
    fn test_domain_exact_and_star() {
        assert!(domain_matches("App.Example.com", "app.example.com"));
        assert!(!domain_matches("www.example.com", "example.com"));
        assert!(domain_matches("anything.io", "*"));
    }

    #[test]
    fn test_origin_host_parsing() {
        assert_eq!(
            origin_host("https://app.example.com").as_deref(),
            Some("app.example.com")
        );
        assert_eq!(
            origin_host("http://localhost:3000").as_deref(),
            Some("localhost")
        );
        assert_eq!(
            origin_host("https://example.com/docs/page?x=1").as_deref(),
            Some("example.com")
        );
        assert_eq!(origin_host("null"), None);
        assert_eq!(origin_host("not a url"), None);
    }
}
