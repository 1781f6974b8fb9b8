// Startup disposition of recordings left by a prior run

use crate::recovery::store::{Disposition, RecoveryStore};
use crate::recovery::{RecordingExporter, RecoveryPrompt, RecoveryResult};

/// What the startup scan did with the pending recordings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub exported: usize,
    pub discarded: usize,
    pub retained: usize,
}

/// Offer the user a disposition for recordings orphaned by a crash or
/// unclean shutdown
///
/// The prompt is shown only when something is pending, and decides the
/// whole batch at once: discard everything, export everything, or postpone
/// to the next startup. Failures while applying a decision keep the
/// affected entries pending — user data is only deleted once its
/// disposition fully succeeded.
pub async fn run_startup_recovery(
    store: &RecoveryStore,
    prompt: &dyn RecoveryPrompt,
    exporter: &dyn RecordingExporter,
) -> RecoveryResult<RecoveryReport> {
    let pending = store.pending().await;
    if pending.is_empty() {
        return Ok(RecoveryReport::default());
    }
    log::info!(
        "{} recording(s) pending from a previous run",
        pending.len()
    );

    let mut report = RecoveryReport::default();
    match prompt.choose(&pending).await {
        Disposition::Postpone => {
            report.retained = pending.len();
        }
        Disposition::Discard => {
            for entry in &pending {
                match store.discard(&entry.name).await {
                    Ok(()) => report.discarded += 1,
                    Err(error) => {
                        log::warn!("Discarding recording '{}' failed: {error}", entry.name);
                        report.retained += 1;
                    }
                }
            }
        }
        Disposition::Export => {
            for entry in &pending {
                match store.export(&entry.name, exporter).await {
                    Ok(()) => report.exported += 1,
                    Err(error) => {
                        log::warn!("Exporting recording '{}' failed: {error}", entry.name);
                        report.retained += 1;
                    }
                }
            }
        }
    }
    Ok(report)
}
