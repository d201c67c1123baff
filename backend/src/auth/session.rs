//! Session token issuance and verification.
//!
//! Tokens are HS256 JWTs carrying the user id and username. The header `kid`
//! names the key that signed the token so retired keys keep verifying old
//! sessions after a rotation.

use std::fmt;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{AuthError, Result};

#[derive(Clone)]
pub struct SigningKey {
    pub id: String,
    pub secret: String,
}

impl SigningKey {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: u64,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub claims: SessionClaims,
}

#[derive(Debug, Clone)]
pub struct SessionIssuer {
    active: SigningKey,
    retired: Vec<SigningKey>,
    ttl_secs: i64,
}

impl SessionIssuer {
    pub fn new(active: SigningKey, retired: Vec<SigningKey>, ttl_secs: i64) -> Self {
        Self {
            active,
            retired,
            ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.signing_key.clone(),
            config.retired_keys.clone(),
            config.session_ttl_secs,
        )
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn issue(&self, user_id: u64, username: &str) -> Result<IssuedSession> {
        self.issue_at(user_id, username, Utc::now().timestamp())
    }

    /// Issues a token as if the current time were `now` (unix seconds).
    pub fn issue_at(&self, user_id: u64, username: &str, now: i64) -> Result<IssuedSession> {
        let exp = now
            .checked_add(self.ttl_secs)
            .ok_or_else(|| AuthError::Token(format!("session TTL {} overflows", self.ttl_secs)))?;
        let claims = SessionClaims {
            user_id,
            username: username.to_string(),
            iat: now,
            exp,
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.active.id.clone());

        let token = encode(
            &header,
            &claims,
            &EncodingKey::from_secret(self.active.secret.as_bytes()),
        )
        .map_err(|e| AuthError::Token(e.to_string()))?;

        Ok(IssuedSession { token, claims })
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let header = decode_header(token).map_err(|_| AuthError::InvalidToken)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let keys = self.keys().filter(|key| match header.kid.as_deref() {
            Some(kid) => key.id == kid,
            None => true,
        });

        for key in keys {
            match decode::<SessionClaims>(
                token,
                &DecodingKey::from_secret(key.secret.as_bytes()),
                &validation,
            ) {
                Ok(data) => return Ok(data.claims),
                Err(e) => debug!(kid = %key.id, error = %e, "token rejected"),
            }
        }

        Err(AuthError::InvalidToken)
    }

    fn keys(&self) -> impl Iterator<Item = &SigningKey> {
        std::iter::once(&self.active).chain(self.retired.iter())
    }
}
