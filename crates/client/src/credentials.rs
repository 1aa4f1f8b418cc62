//! Access credential storage.
//!
//! The connection manager only ever reads the token; writing it is the job of
//! whatever login flow the embedding application has. On desktop the token is
//! a JSON file in the platform-appropriate config directory:
//!   - Linux: `~/.config/kinderlink/`
//!   - macOS: `~/Library/Application Support/kinderlink/`
//!   - Windows: `%APPDATA%\kinderlink\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{RealtimeError, Result};

const TOKEN_KEY: &str = "access_token";

/// Source of the access token attached at connection time.
pub trait CredentialStore: Send + Sync + 'static {
    fn access_token(&self) -> Result<Option<String>>;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialStore for StaticCredentials {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
}

/// JSON files under a directory, one per key.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at `<config dir>/kinderlink`, if the platform has one.
    pub fn from_platform_dir() -> Option<Self> {
        Some(Self::new(dirs::config_dir()?.join("kinderlink")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save_token(&self, token: &str) -> Result<()> {
        self.save(
            TOKEN_KEY,
            &StoredToken {
                access_token: token.to_string(),
            },
        )
    }

    pub fn clear_token(&self) -> Result<()> {
        self.remove(TOKEN_KEY)
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(storage_error)?;
        let json = serde_json::to_string(value)?;
        std::fs::write(self.file_path(key), json).map_err(storage_error)
    }

    /// Returns `None` if the key doesn't exist.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match std::fs::read_to_string(self.file_path(key)) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.file_path(key)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(storage_error(e)),
            _ => Ok(()),
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

impl CredentialStore for FileCredentialStore {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self
            .load::<StoredToken>(TOKEN_KEY)?
            .map(|stored| stored.access_token)
            .filter(|token| !token.is_empty()))
    }
}

fn storage_error(e: std::io::Error) -> RealtimeError {
    RealtimeError::Credentials(e.to_string())
}
