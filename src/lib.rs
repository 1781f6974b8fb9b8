// groundlink — video stream multiplexing and recovery core for a
// ground-control application.
//
// One transport session per named stream, shared by every consumer;
// periodic reconciliation against the upstream stream catalog; durable
// chunk storage so in-flight recordings survive a crash.

pub mod config;
pub mod recovery;
pub mod stream;

pub use config::{ConfigError, SettingsStore, StreamSettings, TomlSettingsStore};
pub use recovery::{
    Disposition, RecordingEntry, RecordingExporter, RecoveryError, RecoveryPrompt,
    RecoveryReport, RecoveryStore, run_startup_recovery,
};
pub use stream::{
    CatalogSource, InvalidationReason, MediaHandle, MediaTrack, MultiplexerConfig, PathRegistry,
    SessionId, SessionState, StreamDescription, StreamDirectory, StreamError, StreamEvent,
    StreamEventHandler, StreamMultiplexer, StreamName, StreamResult, StreamSession,
    StreamTransport, TransportConnection, TransportSession,
};

/// Common result type for groundlink operations
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
