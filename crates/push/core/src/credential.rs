//! Provider credentials and addressing.

use std::sync::Arc;

use sha2::Digest as _;

/// Authentication material for one application.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Signed provider token (`.p8` key).
    Token {
        /// PKCS#8 EC private key in PEM form.
        key_pem: Vec<u8>,
        /// Key identifier from the developer account.
        key_id: String,
        /// Team identifier (JWT issuer).
        team_id: String,
    },
    /// TLS client certificate.
    Certificate {
        /// PEM bundle holding the certificate chain and its private key.
        pem: Vec<u8>,
    },
}

/// Stable identity of a credential, used to key connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CredentialId {
    Token {
        team_id: String,
        key_id: String,
        key_sha256: String,
    },
    Certificate { sha256: String },
}

impl Credential {
    /// Create a token credential.
    pub fn token(
        key_pem: impl Into<Vec<u8>>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        Self::Token {
            key_pem: key_pem.into(),
            key_id: key_id.into(),
            team_id: team_id.into(),
        }
    }

    /// Create a certificate credential from a PEM bundle.
    pub fn certificate(pem: impl Into<Vec<u8>>) -> Self {
        Self::Certificate { pem: pem.into() }
    }

    /// Identity used for connection reuse.
    pub fn id(&self) -> CredentialId {
        match self {
            Self::Token {
                key_pem,
                key_id,
                team_id,
            } => CredentialId::Token {
                team_id: team_id.clone(),
                key_id: key_id.clone(),
                key_sha256: hex_encode(&sha2::Sha256::digest(key_pem)),
            },
            Self::Certificate { pem } => CredentialId::Certificate {
                sha256: hex_encode(&sha2::Sha256::digest(pem)),
            },
        }
    }

    /// Whether requests need a bearer token.
    pub fn uses_token(&self) -> bool {
        matches!(self, Self::Token { .. })
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token {
                key_id, team_id, ..
            } => f
                .debug_struct("Token")
                .field("key_id", key_id)
                .field("team_id", team_id)
                .finish_non_exhaustive(),
            Self::Certificate { .. } => f.debug_struct("Certificate").finish_non_exhaustive(),
        }
    }
}

impl std::fmt::Display for CredentialId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { team_id, key_id, .. } => write!(f, "token:{team_id}/{key_id}"),
            Self::Certificate { sha256 } => write!(f, "cert:{}", &sha256[..12.min(sha256.len())]),
        }
    }
}

/// APNs environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Production,
    Sandbox,
}

impl Endpoint {
    /// Pick the environment from a sandbox flag.
    pub fn from_sandbox(use_sandbox: bool) -> Self {
        if use_sandbox {
            Self::Sandbox
        } else {
            Self::Production
        }
    }

    /// Provider host name.
    pub fn host(&self) -> &'static str {
        match self {
            Self::Production => "api.push.apple.com",
            Self::Sandbox => "api.sandbox.push.apple.com",
        }
    }

    /// Provider port.
    pub fn port(&self) -> u16 {
        443
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => f.write_str("production"),
            Self::Sandbox => f.write_str("sandbox"),
        }
    }
}

/// Everything needed to address pushes for one application.
#[derive(Debug, Clone)]
pub struct Target {
    /// Application identifier the target was resolved from.
    pub application_id: Option<String>,
    /// Credential shared by every connection for this target.
    pub credential: Arc<Credential>,
    /// `apns-topic` (bundle ID).
    pub topic: String,
    /// Production or sandbox.
    pub endpoint: Endpoint,
}

impl Target {
    /// Create a target.
    pub fn new(credential: Arc<Credential>, topic: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            application_id: None,
            credential,
            topic: topic.into(),
            endpoint,
        }
    }

    /// Attach the application identifier.
    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Pool key for this target.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            credential: self.credential.id(),
            endpoint: self.endpoint,
        }
    }
}

/// One live connection is kept per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    pub credential: CredentialId,
    pub endpoint: Endpoint,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.credential, self.endpoint)
    }
}

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Shorten a device token for logs.
pub fn token_prefix(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(8)
        .map_or(token.len(), |(idx, _)| idx);
    &token[..end]
}
