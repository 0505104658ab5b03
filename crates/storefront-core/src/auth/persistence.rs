//! Durable backends for the stored access token.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Keychain service name
const SERVICE_NAME: &str = "storefront-client";

/// Keychain entry holding the raw token string
const TOKEN_KEY: &str = "access_token";

/// Token file name in cache directory
const TOKEN_FILE: &str = "token.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse token file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A single durable slot for the raw token string.
pub trait TokenPersistence: Send + Sync {
    fn load(&self) -> Result<Option<String>, StoreError>;

    fn save(&self, token: &str) -> Result<(), StoreError>;

    fn remove(&self) -> Result<(), StoreError>;
}

/// Token stored in the OS keychain under one named entry
pub struct KeyringPersistence {
    service: String,
}

impl KeyringPersistence {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, TOKEN_KEY)?)
    }
}

impl Default for KeyringPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenPersistence for KeyringPersistence {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, token: &str) -> Result<(), StoreError> {
        self.entry()?.set_password(token)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    stored_at: DateTime<Utc>,
}

/// Token stored as a small JSON file in the cache directory
pub struct FilePersistence {
    cache_dir: PathBuf,
}

impl FilePersistence {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }
}

impl TokenPersistence for FilePersistence {
    fn load(&self) -> Result<Option<String>, StoreError> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let stored: StoredToken = serde_json::from_str(&contents)?;
        Ok(Some(stored.token))
    }

    fn save(&self, token: &str) -> Result<(), StoreError> {
        let path = self.token_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredToken {
            token: token.to_string(),
            stored_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        let path = self.token_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Process-only storage; nothing survives a restart
#[derive(Default)]
pub struct MemoryPersistence {
    token: Mutex<Option<String>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenPersistence for MemoryPersistence {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.token.lock().clone())
    }

    fn save(&self, token: &str) -> Result<(), StoreError> {
        *self.token.lock() = Some(token.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), StoreError> {
        *self.token.lock() = None;
        Ok(())
    }
}
