//! Replication engine: live, filtered, bidirectional sync of one user's
//! documents between the local store and a remote replica.
//!
//! Main event loop that coordinates:
//! - Push of local-origin changes owned by the user (checkpointed by local seq)
//! - Pull of remote changes, re-filtered by owner and applied last-write-wins
//! - Retry with exponential backoff on transient failures
//! - Connectivity changes, poll ticks and commands (sync now, stop)

use crate::backoff::Backoff;
use crate::config::ReplicationConfig;
use crate::credential_manager::CredentialManager;
use crate::error::{SyncError, SyncResult};
use crate::identity::IdentityProvider;
use crate::remote::RemoteReplica;
use crate::types::{Credentials, RemoteChange, ReplicationCommand, SyncState, SyncStatus};
use onespace_storage::{
    ChangeFeed, ChangeFilter, ChangeSince, DocumentStore, Origin, ReplicatedChange, StorageError,
    scope,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handle for commanding a running replication engine.
#[derive(Clone)]
pub struct ReplicationHandle {
    command_tx: mpsc::Sender<ReplicationCommand>,
    status_rx: watch::Receiver<SyncStatus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ReplicationHandle {
    /// Stops the engine and waits for its task to finish. After this
    /// returns nothing more is pushed or pulled. Repeated calls are no-ops.
    pub async fn stop(&self) {
        // The engine may already be gone; either way the task is joined below.
        let _ = self.command_tx.send(ReplicationCommand::Stop).await;
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = %e, "replication task ended abnormally");
            }
        }
    }

    /// Asks for an immediate replication cycle.
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.command_tx
            .send(ReplicationCommand::SyncNow)
            .await
            .map_err(|_| SyncError::NotRunning)
    }

    pub fn status(&self) -> SyncStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> SyncState {
        self.status_rx.borrow().state
    }

    /// A receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Waits until the status satisfies `pred`, or the engine exits.
    pub async fn wait_for(&self, pred: impl Fn(&SyncStatus) -> bool) -> SyncStatus {
        let mut rx = self.status_rx.clone();
        let reached = rx.wait_for(|s| pred(s)).await.map(|s| s.clone()).ok();
        reached.unwrap_or_else(|| rx.borrow().clone())
    }
}

/// Replication engine for one user session.
pub struct ReplicationEngine {
    session: Session,
    command_rx: mpsc::Receiver<ReplicationCommand>,
    connectivity: Option<watch::Receiver<bool>>,
}

/// Everything a replication cycle needs; kept apart from the command
/// channel so the loop can cancel a cycle on stop.
struct Session {
    id: Uuid,
    store: DocumentStore,
    remote: Arc<dyn RemoteReplica>,
    credentials: Arc<CredentialManager>,
    username: String,
    config: ReplicationConfig,
    status_tx: watch::Sender<SyncStatus>,
    backoff: Backoff,
    /// Highest local seq already handed to the push path.
    pushed_through: u64,
}

/// How a waiting engine was woken.
enum Wake {
    Cycle,
    Offline,
    Stop,
}

/// Creates a replication engine and its command handle.
///
/// The engine does nothing until [`ReplicationEngine::run`] is awaited;
/// [`start_replication`] spawns it. `connectivity` of `None` means always
/// online.
pub fn create_replication(
    store: DocumentStore,
    remote: Arc<dyn RemoteReplica>,
    credentials: Arc<CredentialManager>,
    username: String,
    connectivity: Option<watch::Receiver<bool>>,
    config: ReplicationConfig,
) -> (ReplicationHandle, ReplicationEngine) {
    let (command_tx, command_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(SyncStatus::default());
    let backoff = Backoff::new(
        Duration::from_millis(config.initial_backoff_ms),
        Duration::from_millis(config.max_backoff_ms),
    );

    let handle = ReplicationHandle {
        command_tx,
        status_rx,
        task: Arc::new(Mutex::new(None)),
    };
    let engine = ReplicationEngine {
        session: Session {
            id: Uuid::new_v4(),
            store,
            remote,
            credentials,
            username,
            config,
            status_tx,
            backoff,
            pushed_through: 0,
        },
        command_rx,
        connectivity,
    };
    (handle, engine)
}

/// Starts live replication for the identity's user.
///
/// Fails with `AuthRequired` (and spawns nothing) when no credential is
/// available; the store stays fully usable offline.
pub async fn start_replication(
    store: DocumentStore,
    remote: Arc<dyn RemoteReplica>,
    identity: Arc<dyn IdentityProvider>,
    connectivity: Option<watch::Receiver<bool>>,
    config: ReplicationConfig,
) -> SyncResult<ReplicationHandle> {
    let credentials = Arc::new(CredentialManager::new(identity));
    let creds = credentials.get_credentials().await?;
    scope::validate_username(&creds.username)?;

    let (handle, engine) = create_replication(
        store,
        remote,
        credentials,
        creds.username,
        connectivity,
        config,
    );
    let task = tokio::spawn(engine.run());
    *handle.task.lock().await = Some(task);
    Ok(handle)
}

impl ReplicationEngine {
    /// Runs the engine event loop until stopped.
    pub async fn run(self) {
        let Self {
            mut session,
            mut command_rx,
            mut connectivity,
        } = self;
        info!(session = %session.id, username = %session.username, remote = %session.remote.endpoint(), "replication started");

        let filter = ChangeFilter::owned_by(session.username.clone()).with_origin(Origin::Local);
        let mut local = match session.store.changes(ChangeSince::Now, true, filter) {
            Ok(feed) => feed,
            Err(e) => {
                error!(error = %e, "cannot follow local changes, replication not started");
                session.set_state(SyncState::Disconnected, Some(e.to_string()));
                return;
            }
        };
        let mut poll = tokio::time::interval(session.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;
        let mut halted = false;

        'session: loop {
            if !is_online(&connectivity) {
                session.set_state(SyncState::Disconnected, None);
                match wait_online(&mut connectivity, &mut command_rx).await {
                    Wake::Stop => break 'session,
                    _ => continue 'session,
                }
            }

            if session.current_state() == SyncState::Disconnected {
                session.set_state(SyncState::Connecting, None);
            }

            let outcome = tokio::select! {
                result = session.cycle() => Some(result),
                cmd = command_rx.recv() => match cmd {
                    Some(ReplicationCommand::SyncNow) => None,
                    Some(ReplicationCommand::Stop) | None => break 'session,
                },
            };

            let retry_after = match outcome {
                // Sync-now arrived mid-cycle: start over.
                None => continue 'session,
                Some(Ok(())) => {
                    session.backoff.reset();
                    session.set_state(SyncState::Paused, None);
                    None
                }
                Some(Err(e)) if e.is_denied() => {
                    warn!(session = %session.id, error = %e, "remote denied credentials, replication halted");
                    session.credentials.clear().await;
                    session.set_state(SyncState::Denied, Some(e.to_string()));
                    wait_for_stop(&mut command_rx).await;
                    break 'session;
                }
                Some(Err(SyncError::Storage(StorageError::Closed))) => {
                    info!(session = %session.id, "document store closed, stopping replication");
                    break 'session;
                }
                Some(Err(e)) if !e.is_transient() => {
                    error!(session = %session.id, error = %e, "replication failed, not retrying");
                    session.set_state(SyncState::Disconnected, Some(e.to_string()));
                    halted = true;
                    break 'session;
                }
                Some(Err(e)) => {
                    let delay = session.backoff.next_delay();
                    warn!(session = %session.id, error = %e, retry_in = ?delay, "replication cycle failed");
                    session.set_state(SyncState::Paused, Some(e.to_string()));
                    Some(delay)
                }
            };

            let wake = match retry_after {
                Some(delay) => {
                    wait_retry(delay, &mut connectivity, &mut command_rx).await
                }
                None => {
                    wait_idle(
                        &mut local,
                        session.pushed_through,
                        &mut poll,
                        &mut connectivity,
                        &mut command_rx,
                    )
                    .await
                }
            };
            match wake {
                Wake::Stop => break 'session,
                Wake::Offline => {
                    session.set_state(SyncState::Disconnected, None);
                }
                Wake::Cycle => {}
            }
        }

        if !halted && session.current_state() != SyncState::Denied {
            session.set_state(SyncState::Disconnected, None);
        }
        info!(session = %session.id, "replication stopped");
    }
}

/// Store errors that reject one replicated row without failing the page.
fn is_row_rejection(e: &StorageError) -> bool {
    matches!(
        e,
        StorageError::Authorization { .. }
            | StorageError::InvalidDocument(_)
            | StorageError::InvalidRevision(_)
    )
}

fn is_online(connectivity: &Option<watch::Receiver<bool>>) -> bool {
    connectivity.as_ref().is_none_or(|rx| *rx.borrow())
}

/// Waits for a connectivity change. A dropped reporter leaves the last
/// reported value in force.
async fn connectivity_changed(connectivity: &mut Option<watch::Receiver<bool>>) {
    match connectivity {
        Some(rx) => {
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

fn command_wake(cmd: Option<ReplicationCommand>) -> Wake {
    match cmd {
        Some(ReplicationCommand::SyncNow) => Wake::Cycle,
        Some(ReplicationCommand::Stop) | None => Wake::Stop,
    }
}

async fn wait_online(
    connectivity: &mut Option<watch::Receiver<bool>>,
    command_rx: &mut mpsc::Receiver<ReplicationCommand>,
) -> Wake {
    loop {
        tokio::select! {
            _ = connectivity_changed(connectivity) => {
                if is_online(connectivity) {
                    return Wake::Cycle;
                }
            }
            cmd = command_rx.recv() => {
                if let Wake::Stop = command_wake(cmd) {
                    return Wake::Stop;
                }
            }
        }
    }
}

async fn wait_retry(
    delay: Duration,
    connectivity: &mut Option<watch::Receiver<bool>>,
    command_rx: &mut mpsc::Receiver<ReplicationCommand>,
) -> Wake {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Wake::Cycle,
        _ = connectivity_changed(connectivity) => {
            if is_online(connectivity) { Wake::Cycle } else { Wake::Offline }
        }
        cmd = command_rx.recv() => command_wake(cmd),
    }
}

/// Waits while converged. Local changes the last cycle already pushed
/// do not wake the engine.
async fn wait_idle(
    local: &mut ChangeFeed,
    pushed_through: u64,
    poll: &mut tokio::time::Interval,
    connectivity: &mut Option<watch::Receiver<bool>>,
    command_rx: &mut mpsc::Receiver<ReplicationCommand>,
) -> Wake {
    loop {
        tokio::select! {
            event = local.next() => match event {
                Some(event) if event.seq <= pushed_through => continue,
                Some(event) => {
                    debug!(id = %event.id, seq = event.seq, "local change queued for push");
                    return Wake::Cycle;
                }
                None => {
                    info!("document store closed, stopping replication");
                    return Wake::Stop;
                }
            },
            _ = poll.tick() => return Wake::Cycle,
            _ = connectivity_changed(connectivity) => {
                return if is_online(connectivity) { Wake::Cycle } else { Wake::Offline };
            }
            cmd = command_rx.recv() => return command_wake(cmd),
        }
    }
}

async fn wait_for_stop(command_rx: &mut mpsc::Receiver<ReplicationCommand>) {
    while let Some(cmd) = command_rx.recv().await {
        if let ReplicationCommand::Stop = cmd {
            return;
        }
        debug!("ignoring command while denied");
    }
}

impl Session {
    fn current_state(&self) -> SyncState {
        self.status_tx.borrow().state
    }

    fn set_state(&self, state: SyncState, error: Option<String>) {
        self.status_tx.send_modify(|status| {
            if status.state != state {
                debug!(session = %self.id, from = ?status.state, to = ?state, "replication state");
            }
            status.state = state;
            status.last_error = error;
        });
    }

    fn count(&self, pushed: u64, pulled: u64) {
        if pushed == 0 && pulled == 0 {
            return;
        }
        self.status_tx.send_modify(|status| {
            status.docs_pushed += pushed;
            status.docs_pulled += pulled;
        });
    }

    fn checkpoint_key(&self, direction: &str) -> String {
        format!("{direction}:{}:{}", self.remote.endpoint(), self.username)
    }

    /// Pushes then pulls until neither side has anything left to move.
    async fn cycle(&mut self) -> SyncResult<()> {
        let credentials = self.credentials.get_credentials().await?;
        if credentials.username != self.username {
            return Err(SyncError::Denied(format!(
                "credential is for {}, session is for {}",
                credentials.username, self.username
            )));
        }
        self.set_state(SyncState::Active, None);
        let pushed = self.push(&credentials).await?;
        let pulled = self.pull(&credentials).await?;
        debug!(session = %self.id, pushed, pulled, "replication cycle complete");
        Ok(())
    }

    /// Pushes local-origin changes owned by the user since the push
    /// checkpoint, one batch at a time.
    async fn push(&mut self, credentials: &Credentials) -> SyncResult<u64> {
        let key = self.checkpoint_key("push");
        let mut since: u64 = match self.store.load_checkpoint(&key)? {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(%key, %value, "unreadable push checkpoint, pushing from the start");
                0
            }),
            None => 0,
        };
        let filter = ChangeFilter::owned_by(self.username.clone()).with_origin(Origin::Local);
        let batch_size = self.config.batch_size.max(1);
        let mut total = 0u64;

        loop {
            let pending = self.store.changes_since(since, &filter)?;
            if pending.is_empty() {
                self.pushed_through = self.pushed_through.max(since);
                return Ok(total);
            }
            for batch in pending.chunks(batch_size) {
                let docs = batch.iter().map(|event| event.to_wire()).collect();
                self.remote.bulk_docs(credentials, docs).await?;
                if let Some(last) = batch.last() {
                    since = last.seq;
                    self.store.save_checkpoint(&key, &since.to_string())?;
                }
                total += batch.len() as u64;
                self.count(batch.len() as u64, 0);
            }
        }
    }

    /// Pulls remote changes since the pull checkpoint and applies the ones
    /// owned by the user.
    async fn pull(&self, credentials: &Credentials) -> SyncResult<u64> {
        let key = self.checkpoint_key("pull");
        let mut since = self.store.load_checkpoint(&key)?.unwrap_or_else(|| "0".to_string());
        let limit = self.config.batch_size.max(1);
        let mut applied = 0u64;

        loop {
            let page = self.remote.changes(credentials, &since, limit).await?;
            let rows = page.results.len();
            let mut page_applied = 0u64;
            for row in page.results.iter() {
                let Some(change) = self.decode(row) else {
                    continue;
                };
                match self.store.apply_replicated(&change) {
                    Ok(true) => page_applied += 1,
                    Ok(false) => {}
                    Err(e) if is_row_rejection(&e) => {
                        warn!(id = %change.id, error = %e, "remote change rejected by local store, skipped");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            applied += page_applied;
            self.count(0, page_applied);

            let next = page.last_seq_token();
            if next != since {
                self.store.save_checkpoint(&key, &next)?;
            }
            if rows < limit || next == since {
                return Ok(applied);
            }
            since = next;
        }
    }

    /// Turns a remote change row into a change for the local store, or
    /// `None` if it is malformed or belongs to another user.
    fn decode(&self, row: &RemoteChange) -> Option<ReplicatedChange> {
        let decoded = match &row.doc {
            Some(doc) => ReplicatedChange::from_wire(doc.clone()).map(|mut change| {
                change.deleted |= row.deleted;
                change
            }),
            None if row.deleted => match row.changes.first() {
                Some(entry) => entry.rev.parse().map(|rev| ReplicatedChange {
                    id: row.id.clone(),
                    rev,
                    deleted: true,
                    body: Default::default(),
                }),
                None => {
                    warn!(id = %row.id, "remote tombstone without revision skipped");
                    return None;
                }
            },
            None => {
                warn!(id = %row.id, "remote change without document skipped");
                return None;
            }
        };
        let change = match decoded {
            Ok(change) => change,
            Err(e) => {
                warn!(id = %row.id, error = %e, "malformed remote change skipped");
                return None;
            }
        };
        let by_field = change
            .body
            .get("username")
            .and_then(|v| v.as_str())
            .is_some_and(|u| u == self.username);
        if by_field || scope::owns(&change.id, &self.username) {
            Some(change)
        } else {
            warn!(id = %change.id, username = %self.username, "remote change for another user skipped");
            None
        }
    }
}
