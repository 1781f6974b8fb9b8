// Core stream data types
//
// Descriptions are compared structurally during reconciliation, so every
// field that can change upstream must take part in equality.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

/// Consumer-facing name of a logical stream, unique within the multiplexer
pub type StreamName = String;

/// Unique identifier for one transport session instance
pub type SessionId = Uuid;

/// Resolved remote definition of a logical stream
///
/// Produced by the upstream catalog. A structural difference in any field
/// between two resolutions of the same name means the backing session must
/// be rebuilt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    /// Endpoint identity assigned by the catalog
    pub id: String,
    /// Logical stream name this description answers for
    pub name: StreamName,
    /// Signalling parameters used to negotiate the session
    pub signalling: SignallingConfig,
    /// Network paths the catalog allows this stream to negotiate on
    pub allowed_paths: Vec<String>,
}

/// Signalling parameters for session negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignallingConfig {
    /// Signalling endpoint URI
    pub uri: String,
    /// ICE servers for NAT traversal (STUN/TURN)
    pub ice_servers: Vec<IceServerConfig>,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Descriptor of the negotiated media track, as reported by the transport
///
/// The rendering layer attaches to the media through this descriptor; the
/// core never touches the media bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Transport-assigned track identifier
    pub id: String,
    /// Track kind, e.g. "video"
    pub kind: String,
}

/// Shared, read-only handle to a live media track
///
/// Every consumer that requests the same stream name receives a clone of the
/// same handle. The handle carries a liveness signal: once the backing
/// session is torn down, `is_live` turns false and `invalidated` resolves.
/// A stale handle is never revived; re-request the stream name instead.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    session_id: SessionId,
    name: StreamName,
    track: MediaTrack,
    liveness: watch::Receiver<bool>,
}

impl MediaHandle {
    pub(crate) fn new(
        session_id: SessionId,
        name: StreamName,
        track: MediaTrack,
        liveness: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_id,
            name,
            track,
            liveness,
        }
    }

    /// Id of the session backing this handle
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Logical stream name this handle was requested for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the negotiated media track
    pub fn track(&self) -> &MediaTrack {
        &self.track
    }

    /// Whether the backing session is still live
    pub fn is_live(&self) -> bool {
        *self.liveness.borrow()
    }

    /// Wait until the backing session has been torn down
    ///
    /// Returns immediately if the handle is already stale.
    pub async fn invalidated(&mut self) {
        while *self.liveness.borrow_and_update() {
            // Sender dropped means the session is gone as well.
            if self.liveness.changed().await.is_err() {
                return;
            }
        }
    }
}
