use std::{
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const APP_DIR: &str = "catalog-sync";
const TOKEN_FILE: &str = "tokens.json";

/// Credentials attached to every backend request as a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp, seconds.
    pub expires_at: i64,
}

impl AuthTokens {
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum TokenStoreError {
    #[error("token file '{path}' could not be accessed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("token file '{path}' is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no per-user configuration directory is available")]
    NoConfigDir,
}

/// JSON file holding the signed-in user's tokens.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/catalog-sync/tokens.json`
    pub fn default_location() -> Result<Self, TokenStoreError> {
        let dir = dirs::config_dir().ok_or(TokenStoreError::NoConfigDir)?;
        Ok(Self::new(dir.join(APP_DIR).join(TOKEN_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn store(&self, tokens: &AuthTokens) -> Result<(), TokenStoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| self.io_error(source))?;
        }
        let encoded = serde_json::to_vec_pretty(tokens).map_err(|source| {
            TokenStoreError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|source| self.io_error(source))?;
        info!(path = %self.path.display(), "auth: tokens stored");
        Ok(())
    }

    /// `Ok(None)` when nobody is signed in.
    pub async fn load(&self) -> Result<Option<AuthTokens>, TokenStoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "auth: no stored tokens");
                return Ok(None);
            }
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| TokenStoreError::Malformed {
                path: self.path.clone(),
                source,
            })
    }

    /// Removes stored tokens. Returns whether a file was actually deleted.
    pub async fn clear(&self) -> Result<bool, TokenStoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "auth: tokens cleared");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: io::Error) -> TokenStoreError {
        TokenStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
#[path = "tests/token_store_tests.rs"]
mod tests;
