//! Credential secrets: generation, digests and prefix classification.
//!
//! A secret looks like `<prefix><43 base64url chars>`. The random part is
//! 32 bytes from the OS CSPRNG. Only the SHA-256 digest and the last four
//! characters are ever persisted.

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::models::CredentialKind;

pub const GENERAL_PREFIX: &str = "sk_";
pub const SCOPED_PREFIX: &str = "sk_scoped_";

const ENTROPY_BYTES: usize = 32;
/// Length of 32 bytes in unpadded base64url.
pub const RANDOM_LEN: usize = 43;
const HINT_LEN: usize = 4;

pub fn prefix_for(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::General => GENERAL_PREFIX,
        CredentialKind::Scoped => SCOPED_PREFIX,
    }
}

/// A plaintext secret, returned to the caller exactly once.
/// Zeroed from memory on drop.
pub struct IssuedSecret {
    kind: CredentialKind,
    secret: Zeroizing<String>,
}

impl IssuedSecret {
    pub fn kind(&self) -> CredentialKind {
        self.kind
    }

    pub fn expose(&self) -> &str {
        self.secret.as_str()
    }

    pub fn digest(&self) -> String {
        digest(self.expose())
    }

    pub fn hint(&self) -> String {
        hint(self.expose())
    }
}

impl std::fmt::Debug for IssuedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSecret")
            .field("kind", &self.kind)
            .field("hint", &self.hint())
            .finish()
    }
}

pub fn issue(kind: CredentialKind) -> IssuedSecret {
    let mut bytes = Zeroizing::new([0u8; ENTROPY_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    let random = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes[..]);

    let mut secret = Zeroizing::new(String::with_capacity(SCOPED_PREFIX.len() + RANDOM_LEN));
    secret.push_str(prefix_for(kind));
    secret.push_str(&random);

    IssuedSecret { kind, secret }
}

/// SHA-256 of the full secret, lowercase hex. Unsalted, so the same value
/// serves for storage and lookup.
pub fn digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Last four characters, for display only.
pub fn hint(secret: &str) -> String {
    let start = secret
        .char_indices()
        .rev()
        .nth(HINT_LEN - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    secret[start..].to_string()
}

/// Classify a presented secret by shape alone. Returns `None` for anything
/// that could not have been produced by [`issue`].
pub fn classify(secret: &str) -> Option<CredentialKind> {
    // Longest prefix first: the scoped prefix extends the general one.
    for kind in [CredentialKind::Scoped, CredentialKind::General] {
        if let Some(random) = secret.strip_prefix(prefix_for(kind)) {
            if random.len() == RANDOM_LEN && random.bytes().all(is_base64url) {
                return Some(kind);
            }
        }
    }
    None
}

fn is_base64url(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
