use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "catalog.toml";
const ENV_PREFIX: &str = "APP";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub token_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            request_timeout_ms: 30_000,
            token_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parsed base URL; `load_settings` already rejected anything invalid.
    pub fn base_url(&self) -> anyhow::Result<Url> {
        parse_base_url(&self.base_url)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        parse_base_url(&self.base_url)?;
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        self.sync.validate()
    }
}

/// Polling policy for [`crate::SyncController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_polls: 60,
            max_retries: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// `2^retry * backoff_base`, saturating instead of overflowing.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("sync.poll_interval_ms must be greater than zero");
        }
        if self.max_polls == 0 {
            bail!("sync.max_polls must be greater than zero");
        }
        Ok(())
    }
}

/// Defaults, then the optional TOML file, then `APP__*` environment
/// variables (`APP__BASE_URL`, `APP__SYNC__POLL_INTERVAL_MS`, ...).
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let file = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let settings: ClientConfig = Config::builder()
        .add_source(
            File::from(file.as_path())
                .format(FileFormat::Toml)
                .required(path.is_some()),
        )
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("failed to read settings from '{}'", file.display()))?
        .try_deserialize()
        .context("failed to deserialize client settings")?;

    settings.validate()?;
    Ok(settings)
}

fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid base_url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("base_url must use http or https, got '{}'", url.scheme());
    }
    Ok(url)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
