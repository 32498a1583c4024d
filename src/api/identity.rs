//! Identity resolution at connection time
//!
//! The upgrade layer hands us an optional bearer token. A valid HS256 token
//! yields its `sub` claim as the user id. A missing or invalid token does
//! **not** reject the connection: the client gets a fresh anonymous identity.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Claims carried by dashboard identity tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no token verification secret configured")]
    NotConfigured,

    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is empty")]
    EmptySubject,
}

/// Identity attached to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub anonymous: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self {
            user_id: format!("anonymous-{}", Uuid::new_v4()),
            anonymous: true,
        }
    }
}

/// Verifies identity tokens presented at handshake
#[derive(Clone)]
pub struct IdentityResolver {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl IdentityResolver {
    /// Without a secret every connection resolves to an anonymous identity
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            decoding_key: secret.map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and return its user id
    pub fn verify(&self, token: &str) -> Result<String, IdentityError> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or(IdentityError::NotConfigured)?;

        let data = decode::<Claims>(token, key, &self.validation)?;
        let user_id = data.claims.sub.trim();
        if user_id.is_empty() {
            return Err(IdentityError::EmptySubject);
        }

        Ok(user_id.to_string())
    }

    /// Resolve the identity of a new connection
    ///
    /// Falls back to a fresh anonymous identity when no valid token is presented.
    pub fn resolve(&self, token: Option<&str>) -> Identity {
        let Some(token) = token.filter(|token| !token.is_empty()) else {
            debug!("no token presented, assigning anonymous identity");
            return Identity::anonymous();
        };

        match self.verify(token) {
            Ok(user_id) => Identity {
                user_id,
                anonymous: false,
            },
            Err(e) => {
                warn!("token rejected ({e}), assigning anonymous identity");
                Identity::anonymous()
            }
        }
    }
}
