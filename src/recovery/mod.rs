// Crash-safe recording recovery
//
// Recorder output is persisted chunk by chunk as it arrives, so a recording
// interrupted by a crash survives to the next run, where the user decides
// whether to discard it, export it, or postpone the decision.

pub mod error;
pub mod startup;
pub mod store;

pub use error::{RecoveryError, RecoveryResult};
pub use startup::{RecoveryReport, run_startup_recovery};
pub use store::{Disposition, RecordingEntry, RecoveryStore};

use async_trait::async_trait;
use bytes::Bytes;

/// Export collaborator receiving reconstructed recordings
///
/// `name` doubles as the suggested file name. Implementations must only
/// return `Ok` once the data is safely out of the store's hands; the store
/// deletes its copy on success.
#[async_trait]
pub trait RecordingExporter: Send + Sync {
    async fn export(&self, name: &str, data: Bytes) -> RecoveryResult<()>;
}

/// User-facing disposition prompt, shown at most once per startup
#[async_trait]
pub trait RecoveryPrompt: Send + Sync {
    /// Decide the fate of the whole pending batch
    async fn choose(&self, pending: &[RecordingEntry]) -> Disposition;
}
