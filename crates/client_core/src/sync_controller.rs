//! Start/poll/terminate state machine for the backend synchronization job.
//!
//! Each `start()` opens a new session identified by a generation number.
//! Every result that arrives after a suspension point is published only if
//! its generation is still current, so a cancelled or replaced session can
//! never overwrite the state of its successor. The polling task is also
//! aborted on cancel, which stops further ticks immediately.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use shared::{
    error::ClientError,
    protocol::{SyncStarted, SyncStatus},
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use crate::{config::SyncConfig, gateway::RemoteGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Starting,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl SyncState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Polling)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// Read-only view of the current sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSnapshot {
    pub generation: u64,
    pub state: SyncState,
    pub poll_count: u32,
    pub retry_count: u32,
    pub last_error: Option<ClientError>,
    pub status: SyncStatus,
}

impl SyncSnapshot {
    fn idle() -> Self {
        Self::fresh(0, SyncState::Idle)
    }

    fn fresh(generation: u64, state: SyncState) -> Self {
        Self {
            generation,
            state,
            poll_count: 0,
            retry_count: 0,
            last_error: None,
            status: SyncStatus::pending(),
        }
    }
}

struct SessionCell {
    generation: AtomicU64,
    snapshot: watch::Sender<SyncSnapshot>,
}

impl SessionCell {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `update` only while `generation` is still the active session.
    /// The generation check runs under the watch lock, the same lock
    /// `cancel` bumps the generation under.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut SyncSnapshot)) -> bool {
        self.snapshot.send_if_modified(|snapshot| {
            if !self.is_current(generation) {
                return false;
            }
            update(snapshot);
            true
        })
    }

    fn open_session(&self) -> u64 {
        let mut generation = 0;
        self.snapshot.send_modify(|snapshot| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *snapshot = SyncSnapshot::fresh(generation, SyncState::Starting);
        });
        generation
    }
}

pub struct SyncController {
    gateway: Arc<dyn RemoteGateway>,
    config: SyncConfig,
    session: Arc<SessionCell>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SyncController {
    pub fn new(gateway: Arc<dyn RemoteGateway>, config: SyncConfig) -> Self {
        let (snapshot, _) = watch::channel(SyncSnapshot::idle());
        Self {
            gateway,
            config,
            session: Arc::new(SessionCell {
                generation: AtomicU64::new(0),
                snapshot,
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.session.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.session.snapshot.subscribe()
    }

    pub fn updates(&self) -> WatchStream<SyncSnapshot> {
        WatchStream::new(self.subscribe())
    }

    /// Starts a new sync job, cancelling any session still in flight.
    ///
    /// Returns once the backend accepted the job and polling is scheduled.
    /// A rejected start leaves the controller in `Failed` and returns the
    /// classified error; a start cancelled while waiting on the backend
    /// returns [`ClientError::Cancelled`].
    pub async fn start(&self) -> Result<SyncStarted, ClientError> {
        if self.cancel().await {
            debug!("sync: previous session cancelled by restart");
        }

        let generation = self.session.open_session();
        info!(generation, "sync: starting job");

        let started = match self.gateway.begin_sync().await {
            Ok(started) => started,
            Err(err) => {
                let published = self.session.publish(generation, |snapshot| {
                    snapshot.state = SyncState::Failed;
                    snapshot.last_error = Some(err.clone());
                });
                if !published {
                    return Err(ClientError::Cancelled);
                }
                error!(generation, error = %err, "sync: job failed to start");
                return Err(err);
            }
        };

        let mut poller = self.poller.lock().await;
        let published = self.session.publish(generation, |snapshot| {
            snapshot.state = SyncState::Polling;
        });
        if !published {
            return Err(ClientError::Cancelled);
        }

        let task = tokio::spawn(poll_until_done(
            Arc::clone(&self.gateway),
            self.config,
            Arc::clone(&self.session),
            generation,
        ));
        if let Some(previous) = poller.replace(task) {
            previous.abort();
        }
        info!(generation, status = %started.status, "sync: job accepted; polling");
        Ok(started)
    }

    /// Cancels the active session. Returns `false` (and changes nothing)
    /// when the controller is idle or already terminal.
    pub async fn cancel(&self) -> bool {
        let session = &self.session;
        let cancelled = session.snapshot.send_if_modified(|snapshot| {
            if !snapshot.state.is_active() {
                return false;
            }
            session.generation.fetch_add(1, Ordering::SeqCst);
            snapshot.state = SyncState::Cancelled;
            snapshot.retry_count = 0;
            true
        });
        if !cancelled {
            return false;
        }

        if let Some(task) = self.poller.lock().await.take() {
            task.abort();
        }
        debug!("sync: session cancelled");
        true
    }

    /// Starts a new job only when nothing is running. Returns whether a new
    /// session was opened.
    pub async fn retry(&self) -> Result<bool, ClientError> {
        if self.snapshot().state.is_active() {
            return Ok(false);
        }
        self.start().await.map(|_| true)
    }

    /// Resolves once the session observed at call time ends or is replaced.
    pub async fn wait(&self) -> SyncSnapshot {
        let mut rx = self.subscribe();
        let generation = rx.borrow().generation;
        let result = match rx
            .wait_for(|snapshot| snapshot.generation != generation || !snapshot.state.is_active())
            .await
        {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        };
        result
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        if let Some(task) = self.poller.get_mut().take() {
            task.abort();
        }
    }
}

async fn poll_until_done(
    gateway: Arc<dyn RemoteGateway>,
    config: SyncConfig,
    session: Arc<SessionCell>,
    generation: u64,
) {
    loop {
        tokio::time::sleep(config.poll_interval()).await;
        if !session.is_current(generation) {
            return;
        }

        let checked = check_with_backoff(gateway.as_ref(), &config, &session, generation).await;
        let status = match checked {
            Ok(status) => status,
            Err(ClientError::Cancelled) => return,
            Err(err) => {
                if session.publish(generation, |snapshot| {
                    snapshot.state = SyncState::Failed;
                    snapshot.last_error = Some(err.clone());
                }) {
                    error!(generation, error = %err, "sync: status check failed");
                }
                return;
            }
        };

        if let Some(reason) = status.error.clone() {
            let err = ClientError::Remote {
                status: 200,
                code: Some("sync_failed".into()),
                message: reason,
            };
            if session.publish(generation, |snapshot| {
                snapshot.state = SyncState::Failed;
                snapshot.status = status;
                snapshot.last_error = Some(err.clone());
            }) {
                error!(generation, error = %err, "sync: backend reported job failure");
            }
            return;
        }

        if status.complete {
            if session.publish(generation, |snapshot| {
                snapshot.state = SyncState::Succeeded;
                snapshot.status = status;
                snapshot.retry_count = 0;
                snapshot.last_error = None;
            }) {
                info!(generation, "sync: job completed");
            }
            return;
        }

        let mut timed_out = None;
        session.publish(generation, |snapshot| {
            snapshot.poll_count += 1;
            snapshot.retry_count = 0;
            snapshot.status = status;
            if snapshot.poll_count >= config.max_polls {
                let err = ClientError::Timeout {
                    polls: snapshot.poll_count,
                };
                snapshot.state = SyncState::TimedOut;
                snapshot.last_error = Some(err);
                timed_out = Some(snapshot.poll_count);
            }
        });
        if let Some(polls) = timed_out {
            warn!(generation, polls, "sync: poll cap reached; giving up");
            return;
        }
    }
}

/// One logical status check: transient failures are retried after
/// `2^n * backoff_base` until the retry cap is exhausted.
async fn check_with_backoff(
    gateway: &dyn RemoteGateway,
    config: &SyncConfig,
    session: &SessionCell,
    generation: u64,
) -> Result<SyncStatus, ClientError> {
    let mut retry = 0;
    loop {
        let result = gateway.check_status().await;
        if !session.is_current(generation) {
            return Err(ClientError::Cancelled);
        }

        match result {
            Ok(status) => return Ok(status),
            Err(err) if err.is_transient() && retry < config.max_retries => {
                let delay = config.backoff_delay(retry);
                retry += 1;
                session.publish(generation, |snapshot| {
                    snapshot.retry_count = retry;
                    snapshot.last_error = Some(err.clone());
                });
                warn!(
                    generation,
                    attempt = retry,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "sync: status check failed; backing off"
                );
                tokio::time::sleep(delay).await;
                if !session.is_current(generation) {
                    return Err(ClientError::Cancelled);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
#[path = "tests/sync_controller_tests.rs"]
mod tests;
