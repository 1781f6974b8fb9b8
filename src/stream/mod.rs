// Video stream lifecycle management
//
// This module shares one transport session per named stream across all
// consumers, reconciles active sessions against the upstream catalog, and
// tracks the network paths each session negotiates.
//
// The signalling/peer-connection transport itself lives behind the
// `StreamTransport` trait; the upstream catalog behind `CatalogSource`.

pub mod directory;
pub mod error;
pub mod multiplexer;
pub mod paths;
pub mod session;
pub mod types;

pub use directory::StreamDirectory;
pub use error::{StreamError, StreamResult};
pub use multiplexer::{
    InvalidationReason, MultiplexerConfig, StreamEvent, StreamEventHandler, StreamMultiplexer,
};
pub use paths::PathRegistry;
pub use session::{SessionState, StreamSession};
pub use types::{
    IceServerConfig, MediaHandle, MediaTrack, SessionId, SignallingConfig, StreamDescription,
    StreamName,
};

use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

/// Upstream catalog of currently offered streams
///
/// Pull-based: the multiplexer polls it during reconciliation, no push
/// notifications are assumed. Implementations answer with the latest known
/// upstream state at call time.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All streams the upstream source currently offers
    async fn streams(&self) -> StreamResult<Vec<StreamDescription>>;
}

/// Everything the transport hands back for one opened session
pub struct TransportSession {
    /// The negotiated connection, exclusively owned by the session
    pub connection: Box<dyn TransportConnection>,
    /// Descriptor of the media track carried by the connection
    pub track: MediaTrack,
    /// Observed network paths, one event per newly seen path identifier.
    /// Lazy, unbounded and non-restartable; ends when the connection closes.
    pub path_events: mpsc::UnboundedReceiver<String>,
}

/// External transport collaborator that negotiates media sessions
///
/// Implementations must release all underlying resources when an unfinished
/// `open` future or an unregistered `TransportSession` is dropped, since the
/// multiplexer cancels handshakes exactly that way.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open one connection for `description`, negotiating only on
    /// `allowed_paths` (no restriction when empty)
    async fn open(
        &self,
        description: &StreamDescription,
        allowed_paths: &BTreeSet<String>,
    ) -> StreamResult<TransportSession>;
}

/// One live transport connection
#[async_trait]
pub trait TransportConnection: Send + Sync + std::fmt::Debug {
    /// Close the connection gracefully, terminating the path feed
    async fn close(&mut self) -> StreamResult<()>;

    /// Check if the connection is still active
    fn is_connected(&self) -> bool;
}
