//! Credential storage.
//!
//! The whole document lives in memory and every mutation rewrites it. All
//! access goes through one async mutex, so appends are totally ordered and the
//! file write happens while the lock is held.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StoreLocation;
use crate::db::models::{CredentialDocument, NewUser, UserRecord};
use crate::error::{AuthError, Result};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Linear scan, first match wins.
    async fn find_by_username(&self, username: &str) -> Option<UserRecord>;

    /// Assigns the next id, stores the record and persists the document.
    async fn append(&self, user: NewUser) -> Result<UserRecord>;

    /// The id the next successful append will receive.
    async fn next_id(&self) -> u64;

    async fn count(&self) -> usize;
}

pub async fn open_store(location: &StoreLocation) -> Result<Arc<dyn CredentialStore>> {
    match location {
        StoreLocation::Memory => {
            info!("Using in-memory credential store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreLocation::File(path) => Ok(Arc::new(JsonFileStore::open(path).await?)),
    }
}

struct Users {
    document: CredentialDocument,
    next_id: u64,
}

impl Users {
    fn from_document(document: CredentialDocument) -> Result<Self> {
        let next_id = document.next_free_id()?;
        Ok(Self { document, next_id })
    }

    fn push(&mut self, user: NewUser) -> Result<UserRecord> {
        if self.document.find_by_username(&user.username).is_some() {
            return Err(AuthError::UsernameTaken(user.username));
        }

        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| AuthError::Config("user id space exhausted".into()))?;
        let record = UserRecord {
            username: user.username,
            password_hash: user.password_hash,
            id,
        };
        self.document.users.push(record.clone());
        Ok(record)
    }
}

pub struct MemoryStore {
    users: Mutex<Users>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Users {
                document: CredentialDocument::default(),
                next_id: 1,
            }),
        }
    }

    pub fn with_document(document: CredentialDocument) -> Result<Self> {
        Ok(Self {
            users: Mutex::new(Users::from_document(document)?),
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        let users = self.users.lock().await;
        users.document.find_by_username(username).cloned()
    }

    async fn append(&self, user: NewUser) -> Result<UserRecord> {
        self.users.lock().await.push(user)
    }

    async fn next_id(&self) -> u64 {
        self.users.lock().await.next_id
    }

    async fn count(&self) -> usize {
        self.users.lock().await.document.users.len()
    }
}

pub struct JsonFileStore {
    path: PathBuf,
    users: Mutex<Users>,
}

impl JsonFileStore {
    /// Loads the document at `path`. A missing or empty file is an empty store;
    /// a file that does not parse is an error.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let document = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => CredentialDocument::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Credential document not found, starting empty");
                CredentialDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            path = %path.display(),
            users = document.users.len(),
            "Credential store loaded"
        );

        Ok(Self {
            path,
            users: Mutex::new(Users::from_document(document)?),
        })
    }

    /// Writes to a sibling temp file and renames it over the document.
    async fn persist(&self, document: &CredentialDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(document)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "users.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), users = document.users.len(), "Credential document written");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for JsonFileStore {
    async fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        let users = self.users.lock().await;
        users.document.find_by_username(username).cloned()
    }

    async fn append(&self, user: NewUser) -> Result<UserRecord> {
        let mut users = self.users.lock().await;
        let record = users.push(user)?;

        if let Err(e) = self.persist(&users.document).await {
            // Keep memory in line with disk; the consumed id is not reused.
            users.document.users.pop();
            warn!(path = %self.path.display(), error = %e, "Failed to persist credential document");
            return Err(e);
        }

        Ok(record)
    }

    async fn next_id(&self) -> u64 {
        self.users.lock().await.next_id
    }

    async fn count(&self) -> usize {
        self.users.lock().await.document.users.len()
    }
}
