//! Provider authentication tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use push_core::{Credential, CredentialId, PushError};
use serde::{Deserialize, Serialize};

/// APNs rejects tokens older than an hour; refresh ahead of that.
const TOKEN_VALIDITY: Duration = Duration::from_secs(55 * 60);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    iat: i64,
}

struct CachedToken {
    jwt: String,
    created_at: Instant,
}

/// Signed bearer tokens, one per token credential, reused until near expiry.
#[derive(Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<CredentialId, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bearer token for the credential, or `None` for certificate credentials.
    pub fn bearer(&self, credential: &Credential) -> Result<Option<String>, PushError> {
        let Credential::Token {
            key_pem,
            key_id,
            team_id,
        } = credential
        else {
            return Ok(None);
        };

        let id = credential.id();
        let mut tokens = self
            .tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(token) = tokens.get(&id) {
            if token.created_at.elapsed() < TOKEN_VALIDITY {
                return Ok(Some(token.jwt.clone()));
            }
        }

        let jwt = sign(key_pem, key_id, team_id, chrono::Utc::now().timestamp())?;
        tracing::debug!(key_id = %key_id, team_id = %team_id, "signed provider token");
        tokens.insert(
            id,
            CachedToken {
                jwt: jwt.clone(),
                created_at: Instant::now(),
            },
        );
        Ok(Some(jwt))
    }

    /// Forget the cached token so the next request signs a fresh one.
    pub fn invalidate(&self, credential: &Credential) {
        self.tokens
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&credential.id());
    }
}

/// Sign an ES256 provider token.
pub fn sign(key_pem: &[u8], key_id: &str, team_id: &str, issued_at: i64) -> Result<String, PushError> {
    let key = EncodingKey::from_ec_pem(key_pem).map_err(|e| PushError::Authentication {
        reason: format!("invalid signing key: {e}"),
    })?;

    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key_id.to_string());

    let claims = Claims {
        iss: team_id.to_string(),
        iat: issued_at,
    };

    jsonwebtoken::encode(&header, &claims, &key).map_err(|e| PushError::Authentication {
        reason: format!("failed to sign provider token: {e}"),
    })
}
