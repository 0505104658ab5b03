//! Client configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! base URL, the refresh endpoint, timeouts and where the access token is
//! persisted.
//!
//! Configuration is stored at `~/.config/storefront-client/config.json`;
//! `STOREFRONT_*` environment variables override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{CredentialStore, FilePersistence, KeyringPersistence, MemoryPersistence};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "storefront-client";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Refresh call timeout in seconds.
/// Parked callers wait on this call, so it is kept well under the request timeout.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

const ENV_BASE_URL: &str = "STOREFRONT_BASE_URL";
const ENV_REFRESH_PATH: &str = "STOREFRONT_REFRESH_PATH";
const ENV_STORAGE: &str = "STOREFRONT_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum RefreshMethod {
    #[default]
    Get,
    Post,
}

impl RefreshMethod {
    pub fn as_method(self) -> reqwest::Method {
        match self {
            RefreshMethod::Get => reqwest::Method::GET,
            RefreshMethod::Post => reqwest::Method::POST,
        }
    }
}

/// Where the access token survives between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Keyring,
    File,
    Memory,
}

impl std::str::FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageKind::Keyring),
            "file" => Ok(StorageKind::File),
            "memory" => Ok(StorageKind::Memory),
            other => Err(anyhow::anyhow!("Unknown storage kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub refresh_path: String,
    pub refresh_method: RefreshMethod,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub storage: StorageKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            refresh_method: RefreshMethod::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            storage: StorageKind::default(),
        }
    }
}

impl ClientConfig {
    /// Config pointed at `base_url` with every other field defaulted
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Override fields from `STOREFRONT_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base_url) = lookup(ENV_BASE_URL) {
            self.base_url = base_url;
        }
        if let Some(refresh_path) = lookup(ENV_REFRESH_PATH) {
            self.refresh_path = refresh_path;
        }
        if let Some(storage) = lookup(ENV_STORAGE) {
            self.storage = storage
                .parse()
                .with_context(|| format!("Invalid {}", ENV_STORAGE))?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Open the credential store for the configured storage kind
    pub fn credential_store(&self) -> Result<CredentialStore> {
        Ok(match self.storage {
            StorageKind::Keyring => CredentialStore::new(KeyringPersistence::new()),
            StorageKind::File => CredentialStore::new(FilePersistence::new(self.cache_dir()?)),
            StorageKind::Memory => CredentialStore::new(MemoryPersistence::new()),
        })
    }
}
