use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Content, ContentId, Entity, EntityKind, Theme, ThemeId},
    error::{ApiErrorBody, ClientError},
    protocol::{ContentPatch, NewContent, NewTheme, SyncStarted, SyncStatus, ThemePatch},
    validate::{parse_validated, Validate},
};
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;

/// Typed access to the catalog backend. Every `Ok` value has already passed
/// schema validation; every failure is classified.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn fetch_content(&self) -> Result<Vec<Content>, ClientError>;
    async fn fetch_themes(&self) -> Result<Vec<Theme>, ClientError>;
    async fn begin_sync(&self) -> Result<SyncStarted, ClientError>;
    async fn check_status(&self) -> Result<SyncStatus, ClientError>;
    async fn update_content(
        &self,
        id: &ContentId,
        patch: &ContentPatch,
    ) -> Result<Content, ClientError>;
    async fn update_theme(&self, id: &ThemeId, patch: &ThemePatch) -> Result<Theme, ClientError>;
    async fn create_content(&self, draft: &NewContent) -> Result<Content, ClientError>;
    async fn create_theme(&self, draft: &NewTheme) -> Result<Theme, ClientError>;
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), ClientError>;
}

/// Routes the generic store operations to the per-kind gateway calls.
#[async_trait]
pub trait RemoteEntity: Entity {
    async fn fetch_all(gateway: &dyn RemoteGateway) -> Result<Vec<Self>, ClientError>;
    async fn update_remote(
        gateway: &dyn RemoteGateway,
        id: &str,
        patch: &Self::Patch,
    ) -> Result<Self, ClientError>;
    async fn create_remote(
        gateway: &dyn RemoteGateway,
        draft: &Self::Draft,
    ) -> Result<Self, ClientError>;
}

#[async_trait]
impl RemoteEntity for Content {
    async fn fetch_all(gateway: &dyn RemoteGateway) -> Result<Vec<Self>, ClientError> {
        gateway.fetch_content().await
    }

    async fn update_remote(
        gateway: &dyn RemoteGateway,
        id: &str,
        patch: &ContentPatch,
    ) -> Result<Self, ClientError> {
        gateway.update_content(&ContentId::from(id), patch).await
    }

    async fn create_remote(
        gateway: &dyn RemoteGateway,
        draft: &NewContent,
    ) -> Result<Self, ClientError> {
        gateway.create_content(draft).await
    }
}

#[async_trait]
impl RemoteEntity for Theme {
    async fn fetch_all(gateway: &dyn RemoteGateway) -> Result<Vec<Self>, ClientError> {
        gateway.fetch_themes().await
    }

    async fn update_remote(
        gateway: &dyn RemoteGateway,
        id: &str,
        patch: &ThemePatch,
    ) -> Result<Self, ClientError> {
        gateway.update_theme(&ThemeId::from(id), patch).await
    }

    async fn create_remote(gateway: &dyn RemoteGateway, draft: &NewTheme) -> Result<Self, ClientError> {
        gateway.create_theme(draft).await
    }
}

pub struct HttpGateway {
    http: Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url()?,
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_raw(&self, request: RequestBuilder) -> Result<String, ClientError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            let error_body = serde_json::from_str::<ApiErrorBody>(&body).unwrap_or_default();
            warn!(
                status = status.as_u16(),
                code = error_body.code.as_deref().unwrap_or(""),
                "gateway: backend rejected request"
            );
            return Err(ClientError::remote(status.as_u16(), error_body));
        }
        Ok(body)
    }

    async fn send<T>(&self, request: RequestBuilder) -> Result<T, ClientError>
    where
        T: DeserializeOwned + Validate,
    {
        let body = self.send_raw(request).await?;
        parse_validated(&body)
    }
}

fn classify_transport(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::network(format!("request timed out: {err}"))
    } else {
        ClientError::network(err.to_string())
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_content(&self) -> Result<Vec<Content>, ClientError> {
        let url = self.endpoint(&[EntityKind::Content.collection_path()]);
        debug!(%url, "gateway: fetching content");
        self.send(self.http.get(url)).await
    }

    async fn fetch_themes(&self) -> Result<Vec<Theme>, ClientError> {
        let url = self.endpoint(&[EntityKind::Theme.collection_path()]);
        debug!(%url, "gateway: fetching themes");
        self.send(self.http.get(url)).await
    }

    async fn begin_sync(&self) -> Result<SyncStarted, ClientError> {
        let url = self.endpoint(&["content", "sync"]);
        debug!(%url, "gateway: starting sync job");
        self.send(self.http.post(url)).await
    }

    async fn check_status(&self) -> Result<SyncStatus, ClientError> {
        let url = self.endpoint(&["content", "sync", "status"]);
        self.send(self.http.get(url)).await
    }

    async fn update_content(
        &self,
        id: &ContentId,
        patch: &ContentPatch,
    ) -> Result<Content, ClientError> {
        let url = self.endpoint(&[EntityKind::Content.collection_path(), id.as_str()]);
        debug!(%url, "gateway: updating content");
        self.send(self.http.patch(url).json(patch)).await
    }

    async fn update_theme(&self, id: &ThemeId, patch: &ThemePatch) -> Result<Theme, ClientError> {
        let url = self.endpoint(&[EntityKind::Theme.collection_path(), id.as_str()]);
        debug!(%url, "gateway: updating theme");
        self.send(self.http.patch(url).json(patch)).await
    }

    async fn create_content(&self, draft: &NewContent) -> Result<Content, ClientError> {
        let url = self.endpoint(&[EntityKind::Content.collection_path()]);
        self.send(self.http.post(url).json(draft)).await
    }

    async fn create_theme(&self, draft: &NewTheme) -> Result<Theme, ClientError> {
        let url = self.endpoint(&[EntityKind::Theme.collection_path()]);
        self.send(self.http.post(url).json(draft)).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&[kind.collection_path(), id]);
        debug!(%url, "gateway: deleting {}", kind.as_str());
        self.send_raw(self.http.delete(url)).await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
