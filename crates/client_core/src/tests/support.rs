//! Scripted in-memory gateway for controller and store tests.

use std::{collections::VecDeque, sync::Mutex};

use async_trait::async_trait;
use shared::{
    domain::{Content, ContentId, ContentKind, EntityKind, Theme, ThemeId},
    error::{ApiErrorBody, ClientError},
    protocol::{ContentPatch, NewContent, NewTheme, SyncStarted, SyncStatus, ThemePatch},
};
use tokio::{sync::oneshot, time::Instant};

use crate::gateway::RemoteGateway;

pub(crate) enum Reply<T> {
    Ready(Result<T, ClientError>),
    Gated(oneshot::Receiver<Result<T, ClientError>>),
}

impl<T> Reply<T> {
    async fn resolve(self) -> Result<T, ClientError> {
        match self {
            Self::Ready(result) => result,
            Self::Gated(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ClientError::network("gate dropped"))),
        }
    }
}

/// A reply that resolves only once the returned sender fires.
pub(crate) fn gate<T>() -> (oneshot::Sender<Result<T, ClientError>>, Reply<T>) {
    let (tx, rx) = oneshot::channel();
    (tx, Reply::Gated(rx))
}

pub(crate) fn server_error() -> ClientError {
    ClientError::remote(
        500,
        ApiErrorBody {
            message: Some("internal error".into()),
            code: Some("internal".into()),
        },
    )
}

pub(crate) fn offline() -> ClientError {
    ClientError::network("connection refused")
}

pub(crate) fn pending_status() -> SyncStatus {
    SyncStatus::pending()
}

pub(crate) fn complete_status() -> SyncStatus {
    SyncStatus {
        complete: true,
        progress: Some(100.0),
        error: None,
    }
}

pub(crate) fn content(id: &str, theme: Option<&str>) -> Content {
    Content {
        id: ContentId::from(id),
        kind: ContentKind::Post,
        text: format!("post {id}"),
        theme_id: theme.map(ThemeId::from),
        created_at: "2024-03-01T12:00:00Z".parse().expect("timestamp"),
    }
}

pub(crate) fn theme(id: &str, name: &str) -> Theme {
    Theme {
        id: ThemeId::from(id),
        name: name.into(),
        content_count: 0,
        confidence: None,
    }
}

fn next<T>(queue: &Mutex<VecDeque<Reply<T>>>) -> Option<Reply<T>> {
    queue.lock().expect("queue lock").pop_front()
}

#[derive(Default)]
pub(crate) struct FakeGateway {
    content: Mutex<VecDeque<Reply<Vec<Content>>>>,
    themes: Mutex<VecDeque<Reply<Vec<Theme>>>>,
    begin: Mutex<VecDeque<Reply<SyncStarted>>>,
    status: Mutex<VecDeque<Reply<SyncStatus>>>,
    status_fallback: Mutex<Option<SyncStatus>>,
    content_updates: Mutex<VecDeque<Reply<Content>>>,
    theme_updates: Mutex<VecDeque<Reply<Theme>>>,
    content_creates: Mutex<VecDeque<Reply<Content>>>,
    theme_creates: Mutex<VecDeque<Reply<Theme>>>,
    deletes: Mutex<VecDeque<Reply<()>>>,
    status_calls: Mutex<Vec<Instant>>,
    sent_content_patches: Mutex<Vec<(ContentId, ContentPatch)>>,
}

impl FakeGateway {
    pub(crate) fn push_content(&self, reply: Reply<Vec<Content>>) {
        self.content.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_themes(&self, reply: Reply<Vec<Theme>>) {
        self.themes.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_begin(&self, reply: Reply<SyncStarted>) {
        self.begin.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_status(&self, reply: Reply<SyncStatus>) {
        self.status.lock().expect("lock").push_back(reply);
    }

    /// Answer for status checks once the scripted queue is empty. Without
    /// one the job reports "still running" forever.
    pub(crate) fn set_status_fallback(&self, status: SyncStatus) {
        *self.status_fallback.lock().expect("lock") = Some(status);
    }

    pub(crate) fn push_content_update(&self, reply: Reply<Content>) {
        self.content_updates.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_theme_update(&self, reply: Reply<Theme>) {
        self.theme_updates.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_content_create(&self, reply: Reply<Content>) {
        self.content_creates.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_theme_create(&self, reply: Reply<Theme>) {
        self.theme_creates.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn push_delete(&self, reply: Reply<()>) {
        self.deletes.lock().expect("lock").push_back(reply);
    }

    pub(crate) fn status_calls(&self) -> Vec<Instant> {
        self.status_calls.lock().expect("lock").clone()
    }

    pub(crate) fn sent_content_patches(&self) -> Vec<(ContentId, ContentPatch)> {
        self.sent_content_patches.lock().expect("lock").clone()
    }
}

fn unscripted<T>(call: &str) -> Result<T, ClientError> {
    Err(ClientError::network(format!("no scripted reply for {call}")))
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn fetch_content(&self) -> Result<Vec<Content>, ClientError> {
        match next(&self.content) {
            Some(reply) => reply.resolve().await,
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_themes(&self) -> Result<Vec<Theme>, ClientError> {
        match next(&self.themes) {
            Some(reply) => reply.resolve().await,
            None => Ok(Vec::new()),
        }
    }

    async fn begin_sync(&self) -> Result<SyncStarted, ClientError> {
        match next(&self.begin) {
            Some(reply) => reply.resolve().await,
            None => Ok(SyncStarted {
                status: "started".into(),
            }),
        }
    }

    async fn check_status(&self) -> Result<SyncStatus, ClientError> {
        self.status_calls.lock().expect("lock").push(Instant::now());
        match next(&self.status) {
            Some(reply) => reply.resolve().await,
            None => Ok(self
                .status_fallback
                .lock()
                .expect("lock")
                .clone()
                .unwrap_or_else(pending_status)),
        }
    }

    async fn update_content(
        &self,
        id: &ContentId,
        patch: &ContentPatch,
    ) -> Result<Content, ClientError> {
        self.sent_content_patches
            .lock()
            .expect("lock")
            .push((id.clone(), patch.clone()));
        match next(&self.content_updates) {
            Some(reply) => reply.resolve().await,
            None => unscripted("update_content"),
        }
    }

    async fn update_theme(&self, _id: &ThemeId, _patch: &ThemePatch) -> Result<Theme, ClientError> {
        match next(&self.theme_updates) {
            Some(reply) => reply.resolve().await,
            None => unscripted("update_theme"),
        }
    }

    async fn create_content(&self, _draft: &NewContent) -> Result<Content, ClientError> {
        match next(&self.content_creates) {
            Some(reply) => reply.resolve().await,
            None => unscripted("create_content"),
        }
    }

    async fn create_theme(&self, _draft: &NewTheme) -> Result<Theme, ClientError> {
        match next(&self.theme_creates) {
            Some(reply) => reply.resolve().await,
            None => unscripted("create_theme"),
        }
    }

    async fn delete(&self, _kind: EntityKind, _id: &str) -> Result<(), ClientError> {
        match next(&self.deletes) {
            Some(reply) => reply.resolve().await,
            None => unscripted("delete"),
        }
    }
}
