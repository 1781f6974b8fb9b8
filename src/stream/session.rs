// One live transport session backing a logical stream
//
// A session exclusively owns its transport connection and fans the derived
// media handle out to every consumer of the stream name. Observed network
// paths are forwarded to the shared PathRegistry for as long as the
// connection lives.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::stream::paths::PathRegistry;
use crate::stream::types::{MediaHandle, MediaTrack, SessionId, StreamDescription, StreamName};
use crate::stream::{StreamResult, StreamTransport};

/// Lifecycle state of a session
///
/// `Opening` covers the transport handshake, `Live` has media flowing and
/// paths being observed, `Closed` is terminal. A new request for the name
/// after `Closed` always produces a brand-new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Live,
    Closed,
}

/// One transport connection instance backing a logical stream
pub struct StreamSession {
    id: SessionId,
    name: StreamName,
    description: StreamDescription,
    connection: Box<dyn crate::stream::TransportConnection>,
    track: MediaTrack,
    state: SessionState,
    created_at: SystemTime,
    liveness_tx: watch::Sender<bool>,
    liveness_rx: watch::Receiver<bool>,
    forwarder: JoinHandle<()>,
}

impl StreamSession {
    /// Open a session for `description`, negotiating only on the paths in
    /// the current allow-list
    ///
    /// Suspends until the transport signals a negotiated connection or
    /// fails. Dropping the returned future mid-handshake cancels the open;
    /// the transport contract guarantees no resource is leaked by that.
    pub async fn open(
        transport: &dyn StreamTransport,
        description: StreamDescription,
        allowed_paths: &BTreeSet<String>,
        registry: Arc<PathRegistry>,
    ) -> StreamResult<Self> {
        let id = Uuid::new_v4();
        let opened = transport.open(&description, allowed_paths).await?;

        let (liveness_tx, liveness_rx) = watch::channel(true);

        let mut path_events = opened.path_events;
        let forwarder = tokio::spawn(async move {
            // Feed ends when the transport closes the connection.
            while let Some(path) = path_events.recv().await {
                registry.record_observed(id, [path]).await;
            }
        });

        let name = description.name.clone();
        log::info!("Session {id} live for stream '{name}'");

        Ok(Self {
            id,
            name,
            description,
            connection: opened.connection,
            track: opened.track,
            state: SessionState::Live,
            created_at: SystemTime::now(),
            liveness_tx,
            liveness_rx,
            forwarder,
        })
    }

    /// Shared consumer handle for this session's media track
    pub fn media_handle(&self) -> MediaHandle {
        MediaHandle::new(
            self.id,
            self.name.clone(),
            self.track.clone(),
            self.liveness_rx.clone(),
        )
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description this session was created with
    pub fn description(&self) -> &StreamDescription {
        &self.description
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Tear the session down: invalidate every handed-out media handle, stop
    /// path observation, close the transport connection
    pub async fn close(mut self) -> StreamResult<()> {
        self.state = SessionState::Closed;
        let _ = self.liveness_tx.send(false);
        self.forwarder.abort();
        let result = self.connection.close().await;
        log::info!("Session {} closed for stream '{}'", self.id, self.name);
        result
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        // A session dropped without an explicit close (cancelled
        // registration, shutdown races) must still stop its forwarder and
        // stale-mark its handles; the transport closes on drop.
        let _ = self.liveness_tx.send(false);
        self.forwarder.abort();
    }
}
