use std::sync::Arc;

use shared::error::ClientError;
use tracing::info;

use crate::{
    config::ClientConfig,
    gateway::{HttpGateway, RemoteGateway},
    optimistic_store::{ContentStore, FetchOutcome, ThemeStore},
    sync_controller::{SyncController, SyncSnapshot, SyncState},
    token_store::AuthTokens,
};

/// Content and theme collections plus the sync job, all sharing one
/// gateway.
pub struct CatalogClient {
    content: Arc<ContentStore>,
    themes: Arc<ThemeStore>,
    sync: SyncController,
}

impl CatalogClient {
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: &ClientConfig) -> Self {
        Self {
            content: Arc::new(ContentStore::new(Arc::clone(&gateway))),
            themes: Arc::new(ThemeStore::new(Arc::clone(&gateway))),
            sync: SyncController::new(gateway, config.sync),
        }
    }

    pub fn from_config(config: &ClientConfig, tokens: Option<&AuthTokens>) -> anyhow::Result<Self> {
        let mut gateway = HttpGateway::new(config)?;
        if let Some(tokens) = tokens {
            gateway = gateway.with_access_token(tokens.access_token.clone());
        }
        Ok(Self::new(Arc::new(gateway), config))
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    pub fn themes(&self) -> &Arc<ThemeStore> {
        &self.themes
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    pub async fn refresh_all(&self) -> Result<(FetchOutcome, FetchOutcome), ClientError> {
        tokio::try_join!(self.content.fetch(), self.themes.fetch())
    }

    /// Runs a sync job to completion and reloads both collections once it
    /// succeeds. Any other terminal state is returned as an error.
    pub async fn sync_and_refresh(&self) -> Result<SyncSnapshot, ClientError> {
        self.sync.start().await?;
        let done = self.sync.wait().await;
        if done.state != SyncState::Succeeded {
            return Err(done.last_error.unwrap_or(ClientError::Cancelled));
        }

        let (content, themes) = self.refresh_all().await?;
        info!(?content, ?themes, "catalog: collections reloaded after sync");
        Ok(done)
    }
}

#[cfg(test)]
#[path = "tests/catalog_tests.rs"]
mod tests;
