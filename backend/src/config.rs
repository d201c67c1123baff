//! Runtime configuration, read from the environment with builder overrides.

use std::path::PathBuf;

use crate::auth::session::SigningKey;
use crate::error::{AuthError, Result};

/// Database path value that selects the in-memory store.
pub const MEMORY_DB: &str = ":memory:";

const DEV_SECRET: &str = "token-auth-development-secret-change-me";
const MIN_SECRET_LEN: usize = 32;
const DEFAULT_SESSION_TTL_SECS: i64 = 60 * 60;
const MAX_SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub store: StoreLocation,
    /// Key used to sign new tokens.
    pub signing_key: SigningKey,
    /// Keys that still verify tokens but never sign.
    pub retired_keys: Vec<SigningKey>,
    pub session_ttl_secs: i64,
}

impl AppConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            store: StoreLocation::File(PathBuf::from("data/users.json")),
            signing_key: SigningKey::new("primary", secret),
            retired_keys: Vec::new(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
        }
    }

    /// Reads `BIND_ADDR`, `USERS_DB_PATH`, `JWT_SECRET`, `JWT_KEY_ID`,
    /// `JWT_RETIRED_SECRETS` and `SESSION_TTL_SECS`.
    pub fn from_env() -> Result<Self> {
        let secret = match std::env::var("JWT_SECRET") {
            Ok(secret) => secret,
            Err(_) if env_flag("JWT_SECRET_ALLOW_DEV") => {
                tracing::warn!("JWT_SECRET not set, using the development secret");
                DEV_SECRET.to_string()
            }
            Err(_) => return Err(AuthError::Config("JWT_SECRET is not set".into())),
        };

        let mut config = Self::new(secret);

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config = config.with_bind_addr(addr);
        }
        if let Ok(path) = std::env::var("USERS_DB_PATH") {
            config = config.with_store_path(path);
        }
        if let Ok(kid) = std::env::var("JWT_KEY_ID") {
            config.signing_key.id = kid;
        }
        if let Ok(retired) = std::env::var("JWT_RETIRED_SECRETS") {
            config.retired_keys = parse_retired_keys(&retired)?;
        }
        if let Ok(ttl) = std::env::var("SESSION_TTL_SECS") {
            let ttl = ttl
                .parse()
                .map_err(|_| AuthError::Config(format!("SESSION_TTL_SECS is not a number: {ttl}")))?;
            config = config.with_session_ttl_secs(ttl);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.store = if path == MEMORY_DB {
            StoreLocation::Memory
        } else {
            StoreLocation::File(PathBuf::from(path))
        };
        self
    }

    pub fn with_session_ttl_secs(mut self, ttl: i64) -> Self {
        self.session_ttl_secs = ttl;
        self
    }

    pub fn with_retired_key(mut self, key: SigningKey) -> Self {
        self.retired_keys.push(key);
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_key("signing", &self.signing_key)?;
        if self.session_ttl_secs <= 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(AuthError::Config(format!(
                "session TTL must be between 1 and {MAX_SESSION_TTL_SECS} seconds"
            )));
        }

        let mut seen = vec![self.signing_key.id.as_str()];
        for key in &self.retired_keys {
            check_key("retired", key)?;
            if seen.contains(&key.id.as_str()) {
                return Err(AuthError::Config(format!("duplicate key id {}", key.id)));
            }
            seen.push(&key.id);
        }
        Ok(())
    }
}

/// Every key that can verify a token must be as strong as the signing key.
fn check_key(role: &str, key: &SigningKey) -> Result<()> {
    if key.id.is_empty() {
        return Err(AuthError::Config(format!("{role} key id is empty")));
    }
    if key.secret.len() < MIN_SECRET_LEN {
        return Err(AuthError::Config(format!(
            "{role} key {} secret must be at least {MIN_SECRET_LEN} bytes",
            key.id
        )));
    }
    Ok(())
}

fn env_flag(name: &str) -> bool {
    matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true"))
}

/// Parses `kid:secret,kid:secret`.
fn parse_retired_keys(raw: &str) -> Result<Vec<SigningKey>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (kid, secret) = entry.split_once(':').ok_or_else(|| {
                AuthError::Config("JWT_RETIRED_SECRETS entries must be kid:secret".into())
            })?;
            Ok(SigningKey::new(kid, secret))
        })
        .collect()
}
