//! Signup and login flows on top of the credential store and session issuer.

use std::sync::Arc;

use tracing::{debug, info};

use crate::auth::password::{hash_password, verify_password};
use crate::auth::session::{IssuedSession, SessionClaims, SessionIssuer};
use crate::db::models::{NewUser, UserRecord};
use crate::db::repo::CredentialStore;
use crate::error::{AuthError, Result};

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    issuer: SessionIssuer,
    // Verified against when the username is unknown so both failures cost the same.
    dummy_hash: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn CredentialStore>, issuer: SessionIssuer) -> Result<Self> {
        Ok(Self {
            store,
            issuer,
            dummy_hash: hash_password("no-such-user")?,
        })
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn issuer(&self) -> &SessionIssuer {
        &self.issuer
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<UserRecord> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "username and password are required".into(),
            ));
        }

        let plain = password.to_string();
        let password_hash = run_blocking(move || hash_password(&plain)).await??;

        let record = self
            .store
            .append(NewUser {
                username: username.to_string(),
                password_hash,
            })
            .await?;

        info!(user_id = record.id, username = %record.username, "User registered");
        Ok(record)
    }

    /// Unknown usernames and wrong passwords fail identically.
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedSession> {
        let user = self.store.find_by_username(username).await;

        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let plain = password.to_string();
        let matches = run_blocking(move || verify_password(&plain, &stored_hash)).await?;

        match user {
            Some(user) if matches => {
                let session = self.issuer.issue(user.id, &user.username)?;
                info!(user_id = user.id, username = %user.username, "Login successful");
                Ok(session)
            }
            _ => {
                debug!(username = %username, "Login rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        self.issuer.verify(token)
    }
}

/// Argon2 is CPU bound, keep it off the async workers.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::PasswordHash(e.to_string()))
}
