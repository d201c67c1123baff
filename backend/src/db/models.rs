use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    // Persisted under the document's historical field name; always a PHC hash.
    #[serde(rename = "password")]
    pub password_hash: String,
    pub id: u64,
}

/// A user about to be stored; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
}

/// The whole persisted file: `{ "users": [...] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialDocument {
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

impl CredentialDocument {
    pub fn find_by_username(&self, username: &str) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.username == username)
    }

    /// One past the highest id in the document, so ids are never reused.
    pub fn next_free_id(&self) -> Result<u64> {
        let max = self.users.iter().map(|u| u.id).max().unwrap_or(0);
        max.checked_add(1)
            .ok_or_else(|| AuthError::Config(format!("user id {max} leaves no free id")))
    }
}
