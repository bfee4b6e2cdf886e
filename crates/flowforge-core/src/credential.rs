//! Credential entity: a named SSH keypair used by the Source Fetcher and
//! SSH Remoting. §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// A named RSA keypair. The private half is write-only: it is accepted on
/// creation and never returned by any read accessor. `Credential` as
/// modeled here already enforces that by only carrying the private key
/// behind an explicit, separately-constructed value; read paths build a
/// `CredentialSummary` instead (see below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: ResourceId,
    pub name: String,
    /// One-line `ssh-rsa AAAA... comment` authorized-keys representation.
    pub public_key: String,
    /// PEM-encoded private key (`RSA PRIVATE KEY` block), optionally
    /// AES-256 encrypted with a passphrase. Never serialized back out
    /// over a read accessor; callers that only need `CredentialSummary`
    /// should use that type instead of this one.
    pub private_key_pem: String,
    /// Default target used by `TestConnection` when the caller does not
    /// specify one explicitly.
    pub default_host: Option<String>,
    pub default_port: Option<u16>,
    pub default_user: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The read-safe projection of a `Credential`: everything except the
/// private key material. This is what list/get accessors return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: ResourceId,
    pub name: String,
    pub public_key: String,
    pub default_host: Option<String>,
    pub default_port: Option<u16>,
    pub default_user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            public_key: c.public_key.clone(),
            default_host: c.default_host.clone(),
            default_port: c.default_port,
            default_user: c.default_user.clone(),
            created_at: c.created_at,
        }
    }
}
