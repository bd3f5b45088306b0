use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::ConfigLocator;
use crate::sync::MutexExt;

use super::StoreError;

/// Holds the single bearer token of the signed-in user.
///
/// Readers must call [`CredentialStore::token`] for every request instead of
/// keeping a copy, since logout or a new exchange may replace it at any time.
pub trait CredentialStore: Send + Sync {
    fn token(&self) -> Result<Option<String>, StoreError>;
    fn set_token(&self, token: Option<&str>) -> Result<(), StoreError>;
}

/// Process-lifetime store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Result<Option<String>, StoreError> {
        Ok(self.token.lock_or_recover().clone())
    }

    fn set_token(&self, token: Option<&str>) -> Result<(), StoreError> {
        *self.token.lock_or_recover() = token.map(ToOwned::to_owned);
        Ok(())
    }
}

/// Filesystem-backed store located in the user configuration directory.
pub struct FileCredentialStore {
    path: PathBuf,
    profile: String,
}

impl FileCredentialStore {
    pub fn new(locator: &ConfigLocator, profile: impl Into<String>) -> Self {
        let profile = profile.into();
        Self {
            path: locator.credentials_file(&profile),
            profile,
        }
    }

    pub fn with_default_locator(profile: impl Into<String>) -> Result<Self, StoreError> {
        Ok(Self::new(&ConfigLocator::new()?, profile))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(path: &Path, payload: &str) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(payload.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perm = file.metadata()?.permissions();
            perm.set_mode(0o600);
            fs::set_permissions(path, perm)?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn token(&self) -> Result<Option<String>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let envelope: TokenEnvelope = serde_json::from_str(&raw)?;
        Ok(Some(envelope.token))
    }

    fn set_token(&self, token: Option<&str>) -> Result<(), StoreError> {
        match token {
            Some(token) => {
                let envelope = TokenEnvelope {
                    version: 1,
                    profile: self.profile.clone(),
                    token: token.to_owned(),
                };
                let payload = serde_json::to_string_pretty(&envelope)?;
                Self::write_file(&self.path, &payload)
            }
            None => match fs::remove_file(&self.path) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenEnvelope {
    version: u32,
    profile: String,
    token: String,
}
