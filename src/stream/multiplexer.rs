// Stream multiplexer and reconciliation
//
// Maps each logical stream name to at most one live session, shared by every
// consumer of that name. A background loop re-resolves active names against
// the catalog and rebuilds sessions whose descriptions changed; changing the
// path allow-list invalidates and rebuilds the whole map at once.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{SettingsStore, StreamSettings};
use crate::stream::directory::StreamDirectory;
use crate::stream::paths::PathRegistry;
use crate::stream::session::StreamSession;
use crate::stream::types::{MediaHandle, SessionId, StreamDescription, StreamName};
use crate::stream::{CatalogSource, StreamError, StreamResult, StreamTransport};

/// Timing knobs for the multiplexer's background routines
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Period of the reconciliation loop; bounds session staleness
    pub reconcile_interval: Duration,
    /// Period of the multiple-path advisory check
    pub advisory_check_interval: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(300),
            advisory_check_interval: Duration::from_secs(5),
        }
    }
}

/// Notifications emitted by the multiplexer
///
/// Consumers subscribe instead of polling: session teardown is announced
/// here and through each handle's liveness signal, never propagated as an
/// error to uninvolved callers.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A session went live for a stream name
    SessionOpened {
        name: StreamName,
        session_id: SessionId,
    },
    /// A live session was torn down; holders of its media handle must
    /// re-request the stream name
    SessionInvalidated {
        name: StreamName,
        session_id: SessionId,
        reason: InvalidationReason,
    },
    /// Re-resolving a name failed; the session is kept as-is
    ResolutionFailed { name: StreamName, error: String },
    /// More than one network path is routing video and no allow-list is
    /// configured; emitted at most once per process lifetime
    MultiplePathsDetected { paths: Vec<String> },
}

/// Why a session was invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    DescriptionChanged,
    AllowedPathsChanged,
    /// The catalog no longer offers the stream
    Removed,
    ConsumerRequest,
    Shutdown,
}

/// Event handler trait for receiving multiplexer events
#[async_trait]
pub trait StreamEventHandler: Send + Sync {
    async fn on_event(&self, event: StreamEvent);
}

/// Outcome of an in-flight session opening, shared by all waiters
#[derive(Clone)]
enum OpeningState {
    Pending,
    Ready(MediaHandle),
    Failed(Arc<StreamError>),
}

enum SessionSlot {
    /// Transport handshake in flight; waiters share the outcome channel
    Opening {
        outcome: watch::Receiver<OpeningState>,
        abort: AbortHandle,
    },
    Live(StreamSession),
}

struct MuxState {
    sessions: HashMap<StreamName, SessionSlot>,
    allowed_paths: BTreeSet<String>,
    shut_down: bool,
}

struct MuxInner {
    transport: Arc<dyn StreamTransport>,
    directory: StreamDirectory,
    settings: Arc<dyn SettingsStore>,
    registry: Arc<PathRegistry>,
    // One critical section covers the session map and the allow-list:
    // allow-list changes touch every entry atomically.
    state: Mutex<MuxState>,
    handlers: RwLock<Vec<Arc<dyn StreamEventHandler>>>,
    advisory_done: AtomicBool,
    config: MultiplexerConfig,
    cancel: CancellationToken,
}

/// Central orchestrator for logical video streams
pub struct StreamMultiplexer {
    inner: Arc<MuxInner>,
}

impl StreamMultiplexer {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        catalog: Arc<dyn CatalogSource>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self::with_config(transport, catalog, settings, MultiplexerConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn StreamTransport>,
        catalog: Arc<dyn CatalogSource>,
        settings: Arc<dyn SettingsStore>,
        config: MultiplexerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                transport,
                directory: StreamDirectory::new(catalog),
                settings,
                registry: Arc::new(PathRegistry::new()),
                state: Mutex::new(MuxState {
                    sessions: HashMap::new(),
                    allowed_paths: BTreeSet::new(),
                    shut_down: false,
                }),
                handlers: RwLock::new(Vec::new()),
                advisory_done: AtomicBool::new(false),
                config,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Load persisted settings and spawn the background routines
    ///
    /// Call once at application startup, before consumers request handles.
    pub async fn start(&self) {
        match self.inner.settings.load().await {
            Ok(settings) => {
                self.inner
                    .advisory_done
                    .store(settings.path_advisory_shown, Ordering::Relaxed);
                let mut state = self.inner.state.lock().await;
                state.allowed_paths = settings.allowed_paths;
            }
            Err(error) => {
                log::warn!("Loading stream settings failed, using defaults: {error}");
            }
        }
        self.spawn_reconcile_loop();
        self.spawn_advisory_watcher();
    }

    /// Shared media handle for `name`, opening a session if none is live
    ///
    /// Single-flight per name: concurrent callers share one transport open.
    /// Creation failures are returned to every waiting caller and leave the
    /// map entry absent, so the next request retries from scratch.
    pub async fn request_media_handle(&self, name: &str) -> StreamResult<MediaHandle> {
        let outcome = {
            let mut state = self.inner.state.lock().await;
            if state.shut_down {
                return Err(StreamError::Shutdown);
            }
            match state.sessions.get(name) {
                Some(SessionSlot::Live(session)) => return Ok(session.media_handle()),
                Some(SessionSlot::Opening { outcome, .. }) => outcome.clone(),
                None => self
                    .inner
                    .begin_open(&mut state, name.to_string(), None),
            }
        };
        await_opening(name, outcome).await
    }

    /// Replace the network path allow-list
    ///
    /// No-op when unchanged. Otherwise the new set is persisted and every
    /// active session is invalidated and reopened, since negotiated paths
    /// may no longer be permitted — the transport only honors the allow-list
    /// at connection setup.
    pub async fn set_allowed_paths(&self, paths: BTreeSet<String>) -> StreamResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.shut_down {
            return Err(StreamError::Shutdown);
        }
        if state.allowed_paths == paths {
            return Ok(());
        }

        // Persisting inside the critical section serializes settings writes
        // with the invalidate-all; a failed write leaves sessions untouched.
        let settings = StreamSettings {
            allowed_paths: paths.clone(),
            path_advisory_shown: inner.advisory_done.load(Ordering::Relaxed),
        };
        inner
            .settings
            .save(&settings)
            .await
            .map_err(|error| StreamError::configuration(error.to_string()))?;

        log::info!(
            "Path allow-list changed ({} entries); rebuilding all sessions",
            paths.len()
        );
        state.allowed_paths = paths;

        let drained: Vec<(StreamName, SessionSlot)> = state.sessions.drain().collect();
        let mut events = Vec::new();
        let mut reopen = Vec::new();
        for (name, slot) in drained {
            match slot {
                SessionSlot::Opening { abort, .. } => abort.abort(),
                SessionSlot::Live(session) => {
                    let session_id = session.id();
                    let description = session.description().clone();
                    if let Err(error) = session.close().await {
                        log::warn!("Closing session for '{name}' failed: {error}");
                    }
                    events.push(StreamEvent::SessionInvalidated {
                        name: name.clone(),
                        session_id,
                        reason: InvalidationReason::AllowedPathsChanged,
                    });
                    reopen.push((name, description));
                }
            }
        }
        for (name, description) in reopen {
            inner.begin_open(&mut state, name, Some(description));
        }
        drop(state);

        for event in events {
            inner.emit(event).await;
        }
        Ok(())
    }

    /// Tear down the session for `name`, if any
    pub async fn teardown(&self, name: &str) -> StreamResult<()> {
        if self.inner.state.lock().await.shut_down {
            return Err(StreamError::Shutdown);
        }
        self.inner
            .remove_session(name, InvalidationReason::ConsumerRequest)
            .await;
        Ok(())
    }

    /// Run one reconciliation pass immediately
    ///
    /// Every live session's name is re-resolved concurrently; a change in
    /// the resolved description rebuilds that session only. The background
    /// loop runs exactly this on its fixed period; exposing it lets the
    /// application offer a manual refresh.
    pub async fn reconcile_now(&self) {
        MuxInner::reconcile_pass(&self.inner).await;
    }

    /// Stop the background routines and close every session
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let drained: Vec<(StreamName, SessionSlot)> = {
            let mut state = self.inner.state.lock().await;
            state.shut_down = true;
            state.sessions.drain().collect()
        };
        for (name, slot) in drained {
            match slot {
                SessionSlot::Opening { abort, .. } => abort.abort(),
                SessionSlot::Live(session) => {
                    let session_id = session.id();
                    if let Err(error) = session.close().await {
                        log::warn!("Closing session for '{name}' failed: {error}");
                    }
                    self.inner
                        .emit(StreamEvent::SessionInvalidated {
                            name,
                            session_id,
                            reason: InvalidationReason::Shutdown,
                        })
                        .await;
                }
            }
        }
        log::info!("Stream multiplexer shut down");
    }

    /// Register an event handler to receive multiplexer events
    pub async fn register_event_handler(&self, handler: Arc<dyn StreamEventHandler>) {
        self.inner.handlers.write().await.push(handler);
    }

    /// Current network path allow-list
    pub async fn allowed_paths(&self) -> BTreeSet<String> {
        self.inner.state.lock().await.allowed_paths.clone()
    }

    /// Every network path observed in this process lifetime
    pub async fn observed_paths(&self) -> BTreeSet<String> {
        self.inner.registry.global_union().await
    }

    /// Names that currently have a live session
    pub async fn active_streams(&self) -> Vec<StreamName> {
        let state = self.inner.state.lock().await;
        state
            .sessions
            .iter()
            .filter_map(|(name, slot)| match slot {
                SessionSlot::Live(_) => Some(name.clone()),
                SessionSlot::Opening { .. } => None,
            })
            .collect()
    }

    /// Directory view for catalog queries (e.g. listing available names)
    pub fn directory(&self) -> &StreamDirectory {
        &self.inner.directory
    }

    fn spawn_reconcile_loop(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self.inner.config.reconcile_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => MuxInner::reconcile_pass(&inner).await,
                }
            }
        });
    }

    fn spawn_advisory_watcher(&self) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.inner.cancel.clone();
        let period = self.inner.config.advisory_check_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        // The advisory fires at most once; stop for good then.
                        if inner.check_path_advisory().await {
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl MuxInner {
    /// Insert an Opening slot for `name` and spawn the open task
    ///
    /// Caller holds the state lock, so no second slot can appear for the
    /// same name. With no `description`, the task resolves the name first.
    fn begin_open(
        self: &Arc<Self>,
        state: &mut MuxState,
        name: StreamName,
        description: Option<StreamDescription>,
    ) -> watch::Receiver<OpeningState> {
        let (tx, rx) = watch::channel(OpeningState::Pending);
        let inner = Arc::clone(self);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            inner.open_session(task_name, description, tx).await;
        });
        state.sessions.insert(
            name,
            SessionSlot::Opening {
                outcome: rx.clone(),
                abort: handle.abort_handle(),
            },
        );
        rx
    }

    async fn open_session(
        self: Arc<Self>,
        name: StreamName,
        description: Option<StreamDescription>,
        tx: watch::Sender<OpeningState>,
    ) {
        let allowed = self.state.lock().await.allowed_paths.clone();
        let result = self.create_session(&name, description, &allowed).await;

        let mut state = self.state.lock().await;
        // Registration is only valid while the map still carries this
        // attempt's slot; a teardown or allow-list sweep may have raced us.
        let still_ours = matches!(
            state.sessions.get(&name),
            Some(SessionSlot::Opening { outcome, .. }) if outcome.same_channel(&tx.subscribe())
        );

        match result {
            Ok(session) => {
                if !still_ours || state.shut_down {
                    drop(state);
                    let id = session.id();
                    if let Err(error) = session.close().await {
                        log::warn!("Closing superseded session {id} failed: {error}");
                    }
                    let _ = tx.send(OpeningState::Failed(Arc::new(
                        StreamError::SessionInvalidated(name),
                    )));
                    return;
                }
                let handle = session.media_handle();
                let session_id = session.id();
                state
                    .sessions
                    .insert(name.clone(), SessionSlot::Live(session));
                drop(state);
                let _ = tx.send(OpeningState::Ready(handle));
                self.emit(StreamEvent::SessionOpened { name, session_id }).await;
            }
            Err(error) => {
                if still_ours {
                    state.sessions.remove(&name);
                }
                drop(state);
                log::warn!("Opening stream '{name}' failed: {error}");
                let _ = tx.send(OpeningState::Failed(Arc::new(error)));
            }
        }
    }

    async fn create_session(
        &self,
        name: &str,
        description: Option<StreamDescription>,
        allowed: &BTreeSet<String>,
    ) -> StreamResult<StreamSession> {
        let description = match description {
            Some(description) => description,
            None => self
                .directory
                .resolve(name)
                .await?
                .ok_or_else(|| StreamError::StreamNotFound(name.to_string()))?,
        };
        StreamSession::open(
            self.transport.as_ref(),
            description,
            allowed,
            Arc::clone(&self.registry),
        )
        .await
    }

    async fn reconcile_pass(inner: &Arc<Self>) {
        let targets: Vec<(StreamName, StreamDescription)> = {
            let state = inner.state.lock().await;
            state
                .sessions
                .iter()
                .filter_map(|(name, slot)| match slot {
                    SessionSlot::Live(session) => {
                        Some((name.clone(), session.description().clone()))
                    }
                    SessionSlot::Opening { .. } => None,
                })
                .collect()
        };
        // Each name reconciles independently; one slow or failing
        // resolution must not hold up the others.
        join_all(
            targets
                .into_iter()
                .map(|(name, description)| inner.reconcile_stream(name, description)),
        )
        .await;
    }

    async fn reconcile_stream(
        self: &Arc<Self>,
        name: StreamName,
        current: StreamDescription,
    ) {
        match self.directory.resolve(&name).await {
            Err(error) => {
                // Fail-open: a directory hiccup must not cost a working
                // session. Retry happens on the next tick.
                log::warn!("Re-resolving stream '{name}' failed: {error}");
                self.emit(StreamEvent::ResolutionFailed {
                    name,
                    error: error.to_string(),
                })
                .await;
            }
            Ok(None) => {
                log::info!("Stream '{name}' no longer offered; tearing down its session");
                self.remove_session(&name, InvalidationReason::Removed).await;
            }
            Ok(Some(new_description)) => {
                if !StreamDirectory::changed(&current, &new_description) {
                    return;
                }
                log::info!("Stream '{name}' changed upstream; rebuilding session");
                self.restart_session(&name, new_description).await;
            }
        }
    }

    /// Close and remove the session for `name`, leaving the entry vacant
    async fn remove_session(&self, name: &str, reason: InvalidationReason) {
        let slot = self.state.lock().await.sessions.remove(name);
        let Some(slot) = slot else { return };
        match slot {
            SessionSlot::Opening { abort, .. } => abort.abort(),
            SessionSlot::Live(session) => {
                let session_id = session.id();
                if let Err(error) = session.close().await {
                    log::warn!("Closing session for '{name}' failed: {error}");
                }
                self.emit(StreamEvent::SessionInvalidated {
                    name: name.to_string(),
                    session_id,
                    reason,
                })
                .await;
            }
        }
    }

    /// Tear down the live session for `name` and reopen it with a new
    /// description; other sessions are unaffected
    async fn restart_session(self: &Arc<Self>, name: &str, description: StreamDescription) {
        let closed = {
            let mut state = self.state.lock().await;
            match state.sessions.remove(name) {
                Some(SessionSlot::Live(session)) => session,
                Some(slot @ SessionSlot::Opening { .. }) => {
                    // A rebuild is already in flight; leave it alone.
                    state.sessions.insert(name.to_string(), slot);
                    return;
                }
                None => return,
            }
        };
        let session_id = closed.id();
        if let Err(error) = closed.close().await {
            log::warn!("Closing session for '{name}' failed: {error}");
        }
        self.emit(StreamEvent::SessionInvalidated {
            name: name.to_string(),
            session_id,
            reason: InvalidationReason::DescriptionChanged,
        })
        .await;

        let mut state = self.state.lock().await;
        if state.shut_down || state.sessions.contains_key(name) {
            // A consumer re-requested in the gap; their open resolves the
            // latest description anyway.
            return;
        }
        self.begin_open(&mut state, name.to_string(), Some(description));
    }

    /// One advisory check; true once the advisory has fired (now or before)
    async fn check_path_advisory(&self) -> bool {
        if self.advisory_done.load(Ordering::Relaxed) {
            return true;
        }
        // Nothing to advise while the user has already pinned paths.
        if !self.state.lock().await.allowed_paths.is_empty() {
            return false;
        }
        let union = self.registry.global_union().await;
        if union.len() < 2 {
            return false;
        }

        self.advisory_done.store(true, Ordering::Relaxed);
        self.persist_settings().await;
        log::warn!(
            "{} network paths are routing video; pinning one avoids stuttering",
            union.len()
        );
        self.emit(StreamEvent::MultiplePathsDetected {
            paths: union.into_iter().collect(),
        })
        .await;
        true
    }

    async fn persist_settings(&self) {
        let settings = StreamSettings {
            allowed_paths: self.state.lock().await.allowed_paths.clone(),
            path_advisory_shown: self.advisory_done.load(Ordering::Relaxed),
        };
        if let Err(error) = self.settings.save(&settings).await {
            log::warn!("Persisting stream settings failed: {error}");
        }
    }

    async fn emit(&self, event: StreamEvent) {
        let handlers: Vec<Arc<dyn StreamEventHandler>> =
            self.handlers.read().await.iter().cloned().collect();
        for handler in handlers {
            handler.on_event(event.clone()).await;
        }
    }
}

async fn await_opening(
    name: &str,
    mut outcome: watch::Receiver<OpeningState>,
) -> StreamResult<MediaHandle> {
    loop {
        match outcome.borrow_and_update().clone() {
            OpeningState::Ready(handle) => return Ok(handle),
            OpeningState::Failed(error) => return Err(shared_error(name, &error)),
            OpeningState::Pending => {}
        }
        if outcome.changed().await.is_err() {
            // The opening task was aborted; the session never went live.
            return Err(StreamError::SessionInvalidated(name.to_string()));
        }
    }
}

/// Re-materialize a shared opening error for one waiter
fn shared_error(name: &str, error: &StreamError) -> StreamError {
    match error {
        StreamError::Resolution(msg) => StreamError::Resolution(msg.clone()),
        StreamError::StreamNotFound(n) => StreamError::StreamNotFound(n.clone()),
        StreamError::TransportOpen(msg) => StreamError::TransportOpen(msg.clone()),
        StreamError::SessionInvalidated(n) => StreamError::SessionInvalidated(n.clone()),
        other => StreamError::TransportOpen(format!("opening '{name}' failed: {other}")),
    }
}
