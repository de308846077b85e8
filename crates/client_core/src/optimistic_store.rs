//! Optimistic collection store.
//!
//! The visible collection is always derived from two parts: the
//! last-known-good (`confirmed`) items from the backend, and the pending
//! local mutations replayed on top in the order they were issued. A
//! mutation that nothing else overlapped rolls back by restoring its exact
//! pre-image. Overlapping mutations roll back by replaying what is left.
//!
//! Ordering rules:
//! - a confirmed mutation is the new high-water mark for its entity; older
//!   pending mutations on that entity stop being replayed and their later
//!   confirmations are not merged;
//! - every `fetch` takes a refresh token. Its result is dropped when a newer
//!   fetch started or any mutation settled while it was in flight.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{Content, Entity, Theme, ThemeId},
    error::ClientError,
    protocol::ContentPatch,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{RemoteEntity, RemoteGateway};

pub type ContentStore = OptimisticStore<Content>;
pub type ThemeStore = OptimisticStore<Theme>;

const LOCAL_ID_PREFIX: &str = "local-";

/// Pre-image kept for one in-flight mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord<T> {
    pub previous_snapshot: Vec<T>,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot<T> {
    pub items: Vec<T>,
    /// Mutations applied locally but not yet settled by the backend.
    pub pending: usize,
    pub is_loading: bool,
    pub last_error: Option<ClientError>,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            pending: 0,
            is_loading: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { count: usize },
    /// A newer refresh or a settled mutation made this result outdated.
    Stale,
}

#[derive(Debug)]
enum LocalOp<T: Entity> {
    Update { id: String, patch: T::Patch },
    Insert(T),
    Remove { id: String },
}

impl<T: Entity> LocalOp<T> {
    fn target(&self) -> &str {
        match self {
            Self::Update { id, .. } | Self::Remove { id } => id,
            Self::Insert(item) => item.id(),
        }
    }
}

enum Settled<T> {
    Replace(T),
    Removed(String),
}

struct PendingMutation<T: Entity> {
    record: MutationRecord<T>,
    op: LocalOp<T>,
    /// Set once another mutation or a refresh landed during this one's
    /// lifetime; its pre-image is then no longer a valid rollback target.
    overlapped: bool,
}

struct StoreState<T: Entity> {
    confirmed: Vec<T>,
    visible: Vec<T>,
    pending: BTreeMap<u64, PendingMutation<T>>,
    confirmed_seq: HashMap<String, u64>,
    next_seq: u64,
    settled: u64,
    latest_fetch: u64,
    is_loading: bool,
    last_error: Option<ClientError>,
}

impl<T: Entity> StoreState<T> {
    fn new() -> Self {
        Self {
            confirmed: Vec::new(),
            visible: Vec::new(),
            pending: BTreeMap::new(),
            confirmed_seq: HashMap::new(),
            next_seq: 1,
            settled: 0,
            latest_fetch: 0,
            is_loading: false,
            last_error: None,
        }
    }

    fn superseded(&self, id: &str, seq: u64) -> bool {
        self.confirmed_seq.get(id).is_some_and(|mark| *mark > seq)
    }

    fn render(&self) -> Vec<T> {
        let mut items = self.confirmed.clone();
        for (seq, pending) in &self.pending {
            match &pending.op {
                LocalOp::Update { id, patch } => {
                    if self.superseded(id, *seq) {
                        continue;
                    }
                    if let Some(item) = items.iter_mut().find(|item| item.id() == id.as_str()) {
                        item.apply_patch(patch);
                    }
                }
                LocalOp::Insert(item) => items.push(item.clone()),
                LocalOp::Remove { id } => {
                    if !self.superseded(id, *seq) {
                        items.retain(|item| item.id() != id.as_str());
                    }
                }
            }
        }
        items
    }

    fn begin(&mut self, op: LocalOp<T>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let overlapped = !self.pending.is_empty();
        for pending in self.pending.values_mut() {
            pending.overlapped = true;
        }
        self.pending.insert(
            seq,
            PendingMutation {
                record: MutationRecord {
                    previous_snapshot: self.visible.clone(),
                    applied_at: Utc::now(),
                },
                op,
                overlapped,
            },
        );
        self.visible = self.render();
        seq
    }

    /// Merges the backend's canonical result. Returns `false` when a later
    /// mutation on the same entity was already confirmed.
    fn confirm(&mut self, seq: u64, settled: Settled<T>) -> bool {
        let Some(pending) = self.pending.remove(&seq) else {
            return false;
        };
        self.settled += 1;
        self.mark_overlapped();

        let merged = match settled {
            Settled::Replace(canonical) => {
                let target = pending.op.target().to_string();
                if self.superseded(&target, seq) {
                    false
                } else {
                    self.confirmed.retain(|item| {
                        item.id() != target || item.id() == canonical.id()
                    });
                    match self
                        .confirmed
                        .iter_mut()
                        .find(|item| item.id() == canonical.id())
                    {
                        Some(slot) => *slot = canonical.clone(),
                        None => self.confirmed.push(canonical.clone()),
                    }
                    self.confirmed_seq.insert(canonical.id().to_string(), seq);
                    true
                }
            }
            Settled::Removed(id) => {
                if self.superseded(&id, seq) {
                    false
                } else {
                    self.confirmed.retain(|item| item.id() != id);
                    self.confirmed_seq.insert(id, seq);
                    true
                }
            }
        };

        self.prune_marks();
        self.visible = self.render();
        log_settled(&pending.record, seq, "confirmed");
        merged
    }

    fn rollback(&mut self, seq: u64) {
        let Some(pending) = self.pending.remove(&seq) else {
            return;
        };
        self.settled += 1;

        if pending.overlapped {
            self.visible = self.render();
        } else {
            self.visible = pending.record.previous_snapshot.clone();
        }
        self.prune_marks();
        log_settled(&pending.record, seq, "rolled back");
    }

    fn replace_confirmed(&mut self, items: Vec<T>) {
        self.confirmed = items;
        self.mark_overlapped();
        self.visible = self.render();
    }

    fn mark_overlapped(&mut self) {
        for pending in self.pending.values_mut() {
            pending.overlapped = true;
        }
    }

    /// High-water marks only matter while an older mutation on the same
    /// entity is still pending.
    fn prune_marks(&mut self) {
        let pending = &self.pending;
        self.confirmed_seq.retain(|id, mark| {
            pending
                .iter()
                .any(|(seq, mutation)| *seq < *mark && mutation.op.target() == id.as_str())
        });
    }

    fn snapshot(&self) -> CollectionSnapshot<T> {
        CollectionSnapshot {
            items: self.visible.clone(),
            pending: self.pending.len(),
            is_loading: self.is_loading,
            last_error: self.last_error.clone(),
        }
    }
}

fn log_settled<T>(record: &MutationRecord<T>, seq: u64, outcome: &str) {
    let elapsed_ms = (Utc::now() - record.applied_at).num_milliseconds();
    debug!(seq, elapsed_ms, "store: mutation {outcome}");
}

pub struct OptimisticStore<T: RemoteEntity> {
    gateway: Arc<dyn RemoteGateway>,
    state: Mutex<StoreState<T>>,
    published: watch::Sender<CollectionSnapshot<T>>,
}

impl<T: RemoteEntity> OptimisticStore<T> {
    pub fn new(gateway: Arc<dyn RemoteGateway>) -> Self {
        let (published, _) = watch::channel(CollectionSnapshot::default());
        Self {
            gateway,
            state: Mutex::new(StoreState::new()),
            published,
        }
    }

    pub fn snapshot(&self) -> CollectionSnapshot<T> {
        self.published.borrow().clone()
    }

    pub fn items(&self) -> Vec<T> {
        self.published.borrow().items.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<T>> {
        self.published.subscribe()
    }

    fn publish(&self, state: &StoreState<T>) {
        self.published.send_replace(state.snapshot());
    }

    /// Replaces the collection with the backend's current contents.
    pub async fn fetch(&self) -> Result<FetchOutcome, ClientError> {
        let (token, settled_at_start) = {
            let mut state = self.state.lock().await;
            state.latest_fetch += 1;
            state.is_loading = true;
            self.publish(&state);
            (state.latest_fetch, state.settled)
        };

        let result = T::fetch_all(self.gateway.as_ref()).await;

        let mut state = self.state.lock().await;
        if token != state.latest_fetch {
            debug!(kind = T::KIND.as_str(), token, "store: newer refresh in flight; dropping result");
            return Ok(FetchOutcome::Stale);
        }
        state.is_loading = false;

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                state.last_error = Some(err.clone());
                self.publish(&state);
                warn!(kind = T::KIND.as_str(), error = %err, "store: refresh failed");
                return Err(err);
            }
        };

        if state.settled != settled_at_start {
            debug!(kind = T::KIND.as_str(), token, "store: mutation settled during refresh; dropping result");
            self.publish(&state);
            return Ok(FetchOutcome::Stale);
        }

        let count = items.len();
        state.replace_confirmed(items);
        state.last_error = None;
        self.publish(&state);
        info!(kind = T::KIND.as_str(), count, "store: collection refreshed");
        Ok(FetchOutcome::Applied { count })
    }

    /// Applies `patch` locally, then confirms it with the backend. On
    /// failure the collection is restored and the error returned; nothing
    /// is retried.
    pub async fn update(&self, id: &str, patch: T::Patch) -> Result<T, ClientError> {
        let seq = self
            .apply_local(LocalOp::Update {
                id: id.to_string(),
                patch: patch.clone(),
            })
            .await;

        let result = T::update_remote(self.gateway.as_ref(), id, &patch).await;
        self.settle(seq, result, Settled::Replace).await
    }

    /// Shows a provisional entity immediately and swaps in the backend's
    /// entity (with its assigned id) once created.
    pub async fn create(&self, draft: T::Draft) -> Result<T, ClientError> {
        let local_id = format!("{LOCAL_ID_PREFIX}{}", Uuid::new_v4());
        let seq = self
            .apply_local(LocalOp::Insert(T::provisional(local_id, &draft)))
            .await;

        let result = T::create_remote(self.gateway.as_ref(), &draft).await;
        self.settle(seq, result, Settled::Replace).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let seq = self
            .apply_local(LocalOp::Remove { id: id.to_string() })
            .await;

        let result = self.gateway.delete(T::KIND, id).await;
        let removed = id.to_string();
        self.settle(seq, result, move |()| Settled::Removed(removed))
            .await
    }

    async fn apply_local(&self, op: LocalOp<T>) -> u64 {
        let mut state = self.state.lock().await;
        let target = op.target().to_string();
        let seq = state.begin(op);
        self.publish(&state);
        debug!(kind = T::KIND.as_str(), seq, id = %target, "store: applied optimistic mutation");
        seq
    }

    async fn settle<R, O>(
        &self,
        seq: u64,
        result: Result<R, ClientError>,
        settled: impl FnOnce(R) -> Settled<T>,
    ) -> Result<O, ClientError>
    where
        R: Clone + Into<O>,
    {
        let mut state = self.state.lock().await;
        match result {
            Ok(value) => {
                if !state.confirm(seq, settled(value.clone())) {
                    debug!(kind = T::KIND.as_str(), seq, "store: confirmation superseded by a later mutation");
                }
                self.publish(&state);
                Ok(value.into())
            }
            Err(err) => {
                state.rollback(seq);
                state.last_error = Some(err.clone());
                self.publish(&state);
                warn!(kind = T::KIND.as_str(), seq, error = %err, "store: mutation rejected; rolled back");
                Err(err)
            }
        }
    }
}

impl OptimisticStore<Content> {
    pub async fn assign_theme(
        &self,
        content_id: &str,
        theme_id: impl Into<ThemeId>,
    ) -> Result<Content, ClientError> {
        self.update(content_id, ContentPatch::theme(theme_id)).await
    }
}

#[cfg(test)]
#[path = "tests/optimistic_store_tests.rs"]
mod tests;
