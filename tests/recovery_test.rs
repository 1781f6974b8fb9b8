// Recording recovery and disposition tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use groundlink::recovery::{
    Disposition, RecordingEntry, RecordingExporter, RecoveryError, RecoveryPrompt,
    RecoveryResult, RecoveryStore, run_startup_recovery,
};
use tokio::sync::Mutex;

/// Exporter that captures exported blobs and can fail on demand
#[derive(Default)]
struct CapturingExporter {
    exports: Mutex<Vec<(String, Bytes)>>,
    fail_for: Mutex<Option<String>>,
}

impl CapturingExporter {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn fail_for(&self, name: &str) {
        *self.fail_for.lock().await = Some(name.to_string());
    }

    async fn succeed(&self) {
        *self.fail_for.lock().await = None;
    }
}

#[async_trait]
impl RecordingExporter for CapturingExporter {
    async fn export(&self, name: &str, data: Bytes) -> RecoveryResult<()> {
        if self.fail_for.lock().await.as_deref() == Some(name) {
            return Err(RecoveryError::export("destination unavailable"));
        }
        self.exports.lock().await.push((name.to_string(), data));
        Ok(())
    }
}

/// Prompt scripted with a fixed decision
struct ScriptedPrompt {
    choice: Disposition,
    calls: AtomicUsize,
}

impl ScriptedPrompt {
    fn new(choice: Disposition) -> Self {
        Self {
            choice,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RecoveryPrompt for ScriptedPrompt {
    async fn choose(&self, _pending: &[RecordingEntry]) -> Disposition {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.choice
    }
}

#[tokio::test]
async fn test_export_reconstructs_chunks_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    let exporter = CapturingExporter::new();

    store
        .append_chunk("flight1", Bytes::from_static(b"C1"))
        .await
        .unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"C2"))
        .await
        .unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"C3"))
        .await
        .unwrap();

    store.export("flight1", exporter.as_ref()).await.unwrap();

    let exports = exporter.exports.lock().await;
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].0, "flight1");
    assert_eq!(&exports[0].1[..], b"C1C2C3");
    drop(exports);

    // Data is gone only after the exporter confirmed success.
    assert!(store.pending().await.is_empty());
    assert!(!dir.path().join("flight1").exists());
}

#[tokio::test]
async fn test_chunk_order_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = RecoveryStore::open(dir.path()).await.unwrap();
        for chunk in [&b"one "[..], &b"two "[..], &b"three"[..]] {
            store
                .append_chunk("flight1", Bytes::copy_from_slice(chunk))
                .await
                .unwrap();
        }
    }

    let store = RecoveryStore::open(dir.path()).await.unwrap();
    let exporter = CapturingExporter::new();
    store.export("flight1", exporter.as_ref()).await.unwrap();

    let exports = exporter.exports.lock().await;
    assert_eq!(&exports[0].1[..], b"one two three");
}

#[tokio::test]
async fn test_failed_export_keeps_entry_and_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    let exporter = CapturingExporter::new();
    exporter.fail_for("flight1").await;

    store
        .append_chunk("flight1", Bytes::from_static(b"C1"))
        .await
        .unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"C2"))
        .await
        .unwrap();

    let error = store.export("flight1", exporter.as_ref()).await.unwrap_err();
    assert!(matches!(error, RecoveryError::Export(_)));

    // Entry stays pending and every chunk file survives.
    let pending = store.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].chunks, 2);
    assert!(dir.path().join("flight1").join("00000.bin").exists());
    assert!(dir.path().join("flight1").join("00001.bin").exists());

    // Once the destination recovers, the same entry exports cleanly.
    exporter.succeed().await;
    store.export("flight1", exporter.as_ref()).await.unwrap();
    assert_eq!(&exporter.exports.lock().await[0].1[..], b"C1C2");
    assert!(store.pending().await.is_empty());
}

#[tokio::test]
async fn test_append_after_resolution_starts_a_new_recording() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();

    store
        .append_chunk("flight1", Bytes::from_static(b"old"))
        .await
        .unwrap();
    store.discard("flight1").await.unwrap();

    store
        .append_chunk("flight1", Bytes::from_static(b"new"))
        .await
        .unwrap();
    let pending = store.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].chunks, 1);
    assert_eq!(pending[0].bytes, 3);
}

#[tokio::test]
async fn test_startup_prompt_skipped_when_nothing_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    let prompt = ScriptedPrompt::new(Disposition::Discard);
    let exporter = CapturingExporter::new();

    let report = run_startup_recovery(&store, &prompt, exporter.as_ref())
        .await
        .unwrap();

    assert_eq!(prompt.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.exported + report.discarded + report.retained, 0);
}

#[tokio::test]
async fn test_startup_postpone_leaves_batch_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"a"))
        .await
        .unwrap();
    store
        .append_chunk("flight2", Bytes::from_static(b"b"))
        .await
        .unwrap();

    let prompt = ScriptedPrompt::new(Disposition::Postpone);
    let exporter = CapturingExporter::new();
    let report = run_startup_recovery(&store, &prompt, exporter.as_ref())
        .await
        .unwrap();

    assert_eq!(prompt.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.retained, 2);
    assert_eq!(store.pending().await.len(), 2);
}

#[tokio::test]
async fn test_startup_discard_removes_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"a"))
        .await
        .unwrap();
    store
        .append_chunk("flight2", Bytes::from_static(b"b"))
        .await
        .unwrap();

    let prompt = ScriptedPrompt::new(Disposition::Discard);
    let exporter = CapturingExporter::new();
    let report = run_startup_recovery(&store, &prompt, exporter.as_ref())
        .await
        .unwrap();

    assert_eq!(report.discarded, 2);
    assert!(store.pending().await.is_empty());
    assert!(exporter.exports.lock().await.is_empty());
}

#[tokio::test]
async fn test_startup_export_keeps_failed_entries_pending() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    store
        .append_chunk("flight1", Bytes::from_static(b"ok"))
        .await
        .unwrap();
    store
        .append_chunk("flight2", Bytes::from_static(b"stuck"))
        .await
        .unwrap();

    let prompt = ScriptedPrompt::new(Disposition::Export);
    let exporter = CapturingExporter::new();
    exporter.fail_for("flight2").await;

    let report = run_startup_recovery(&store, &prompt, exporter.as_ref())
        .await
        .unwrap();

    assert_eq!(report.exported, 1);
    assert_eq!(report.retained, 1);
    let pending = store.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "flight2");
}

#[tokio::test]
async fn test_resolve_dispatches_dispositions() {
    let dir = tempfile::tempdir().unwrap();
    let store = RecoveryStore::open(dir.path()).await.unwrap();
    let exporter = CapturingExporter::new();

    store
        .append_chunk("flight1", Bytes::from_static(b"x"))
        .await
        .unwrap();

    store
        .resolve("flight1", Disposition::Postpone, exporter.as_ref())
        .await
        .unwrap();
    assert_eq!(store.pending().await.len(), 1);

    store
        .resolve("flight1", Disposition::Export, exporter.as_ref())
        .await
        .unwrap();
    assert!(store.pending().await.is_empty());
    assert_eq!(exporter.exports.lock().await.len(), 1);
}
