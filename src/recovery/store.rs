// Durable chunk storage for recordings in progress
//
// Layout: one directory per recording under the store root, holding a
// `meta.json` document and zero-padded `NNNNN.bin` chunk files in arrival
// order. Chunks are separate files written via temp-and-rename with an
// fsync, so a crash mid-append never touches committed data, and the
// ascending file sequence reproduces exactly the order chunks arrived in.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::recovery::{RecordingExporter, RecoveryError, RecoveryResult};

const META_FILE: &str = "meta.json";
const CHUNK_EXT: &str = "bin";

/// User decision for a pending recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delete all chunks immediately
    Discard,
    /// Leave the entry pending for the next startup scan
    Postpone,
    /// Reconstruct the file, hand it to the exporter, delete on success
    Export,
}

/// Pending-recording summary handed to the disposition prompt
#[derive(Debug, Clone)]
pub struct RecordingEntry {
    pub name: String,
    pub chunks: usize,
    pub bytes: u64,
    pub started_at: DateTime<Utc>,
}

/// Per-recording metadata document, written once at entry creation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordingMeta {
    name: String,
    started_at: DateTime<Utc>,
}

struct CatalogEntry {
    dir: PathBuf,
    /// Chunk files in arrival order
    chunks: Vec<PathBuf>,
    bytes: u64,
    started_at: DateTime<Utc>,
    next_seq: u64,
}

impl CatalogEntry {
    fn summary(&self, name: &str) -> RecordingEntry {
        RecordingEntry {
            name: name.to_string(),
            chunks: self.chunks.len(),
            bytes: self.bytes,
            started_at: self.started_at,
        }
    }
}

/// Append-only local store for in-progress recording chunks
///
/// Entries persist until explicitly discarded or exported; they represent
/// durable user data and are never dropped silently. Precondition: a single
/// writer per recording name — concurrent appends to the same name are
/// undefined and not arbitrated here.
pub struct RecoveryStore {
    root: PathBuf,
    catalog: RwLock<HashMap<String, CatalogEntry>>,
}

impl RecoveryStore {
    /// Open the store at `root`, scanning recordings left by a prior run
    pub async fn open(root: impl Into<PathBuf>) -> RecoveryResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut catalog = HashMap::new();
        let mut dirs = tokio::fs::read_dir(&root).await?;
        while let Some(dir_entry) = dirs.next_entry().await? {
            if !dir_entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::scan_recording(&dir_entry.path()).await {
                Ok((name, entry)) => {
                    log::info!(
                        "Recovered pending recording '{name}' ({} chunk(s), {} byte(s))",
                        entry.chunks.len(),
                        entry.bytes
                    );
                    catalog.insert(name, entry);
                }
                Err(error) => {
                    log::warn!(
                        "Skipping unreadable recording directory {:?}: {error}",
                        dir_entry.path()
                    );
                }
            }
        }

        Ok(Self {
            root,
            catalog: RwLock::new(catalog),
        })
    }

    /// Root directory the store persists under
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Durably persist one chunk, creating the catalog entry on first write
    ///
    /// Errors propagate to the caller synchronously; a failed append means
    /// the chunk is not part of the recording.
    pub async fn append_chunk(&self, name: &str, chunk: Bytes) -> RecoveryResult<()> {
        validate_name(name)?;

        let mut catalog = self.catalog.write().await;
        if !catalog.contains_key(name) {
            let entry = self.create_recording(name).await?;
            catalog.insert(name.to_string(), entry);
        }
        let entry = catalog
            .get_mut(name)
            .ok_or_else(|| RecoveryError::UnknownRecording(name.to_string()))?;

        let seq = entry.next_seq;
        let path = entry.dir.join(format!("{seq:05}.{CHUNK_EXT}"));
        let tmp = entry.dir.join(format!("{seq:05}.{CHUNK_EXT}.tmp"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&chunk).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        entry.bytes += chunk.len() as u64;
        entry.chunks.push(path);
        entry.next_seq = seq + 1;
        Ok(())
    }

    /// All recordings still awaiting disposition, sorted by name
    pub async fn pending(&self) -> Vec<RecordingEntry> {
        let catalog = self.catalog.read().await;
        let mut entries: Vec<RecordingEntry> = catalog
            .iter()
            .map(|(name, entry)| entry.summary(name))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Delete all chunks for `name` and drop its entry
    pub async fn discard(&self, name: &str) -> RecoveryResult<()> {
        let mut catalog = self.catalog.write().await;
        let entry = catalog
            .get(name)
            .ok_or_else(|| RecoveryError::UnknownRecording(name.to_string()))?;
        tokio::fs::remove_dir_all(&entry.dir).await?;
        catalog.remove(name);
        log::info!("Discarded recording '{name}'");
        Ok(())
    }

    /// Reconstruct `name` by concatenating its chunks in arrival order and
    /// hand the result to the exporter
    ///
    /// Data is deleted only after the exporter confirms success; any
    /// failure before that leaves the entry pending with all chunks intact.
    pub async fn export(
        &self,
        name: &str,
        exporter: &dyn RecordingExporter,
    ) -> RecoveryResult<()> {
        let mut catalog = self.catalog.write().await;
        let entry = catalog
            .get(name)
            .ok_or_else(|| RecoveryError::UnknownRecording(name.to_string()))?;

        let mut data = BytesMut::with_capacity(entry.bytes as usize);
        for chunk_path in &entry.chunks {
            let chunk = tokio::fs::read(chunk_path).await?;
            data.extend_from_slice(&chunk);
        }

        exporter.export(name, data.freeze()).await?;

        tokio::fs::remove_dir_all(&entry.dir).await?;
        catalog.remove(name);
        log::info!("Exported recording '{name}'");
        Ok(())
    }

    /// Apply one user decision to a pending recording
    pub async fn resolve(
        &self,
        name: &str,
        disposition: Disposition,
        exporter: &dyn RecordingExporter,
    ) -> RecoveryResult<()> {
        match disposition {
            Disposition::Discard => self.discard(name).await,
            Disposition::Export => self.export(name, exporter).await,
            Disposition::Postpone => Ok(()),
        }
    }

    async fn create_recording(&self, name: &str) -> RecoveryResult<CatalogEntry> {
        let dir = self.root.join(name);
        tokio::fs::create_dir_all(&dir).await?;

        let meta = RecordingMeta {
            name: name.to_string(),
            started_at: Utc::now(),
        };
        let raw = serde_json::to_vec_pretty(&meta)
            .map_err(|error| RecoveryError::catalog(error.to_string()))?;
        let tmp = dir.join(format!("{META_FILE}.tmp"));
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, dir.join(META_FILE)).await?;

        Ok(CatalogEntry {
            dir,
            chunks: Vec::new(),
            bytes: 0,
            started_at: meta.started_at,
            next_seq: 0,
        })
    }

    async fn scan_recording(dir: &Path) -> RecoveryResult<(String, CatalogEntry)> {
        let meta = Self::read_meta(dir).await?;

        let mut chunks: Vec<(u64, PathBuf, u64)> = Vec::new();
        let mut files = tokio::fs::read_dir(dir).await?;
        while let Some(file) = files.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(CHUNK_EXT) {
                continue;
            }
            let Some(seq) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u64>().ok())
            else {
                continue;
            };
            let bytes = file.metadata().await?.len();
            chunks.push((seq, path, bytes));
        }
        chunks.sort_by_key(|(seq, _, _)| *seq);

        let next_seq = chunks.last().map(|(seq, _, _)| seq + 1).unwrap_or(0);
        let bytes = chunks.iter().map(|(_, _, bytes)| bytes).sum();
        Ok((
            meta.name,
            CatalogEntry {
                dir: dir.to_path_buf(),
                chunks: chunks.into_iter().map(|(_, path, _)| path).collect(),
                bytes,
                started_at: meta.started_at,
                next_seq,
            },
        ))
    }

    async fn read_meta(dir: &Path) -> RecoveryResult<RecordingMeta> {
        match tokio::fs::read(dir.join(META_FILE)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|error| RecoveryError::catalog(error.to_string())),
            // Tolerate a crash between directory creation and the metadata
            // rename: fall back to the directory name and mtime.
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                let name = dir
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| RecoveryError::catalog("unnamed recording directory"))?
                    .to_string();
                let modified = tokio::fs::metadata(dir).await?.modified()?;
                Ok(RecordingMeta {
                    name,
                    started_at: modified.into(),
                })
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn validate_name(name: &str) -> RecoveryResult<()> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(RecoveryError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("flight1").is_ok());
        assert!(validate_name("video_2026-08-06 14.02.11").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_append_creates_entry_and_orders_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::open(dir.path()).await.unwrap();

        store
            .append_chunk("flight1", Bytes::from_static(b"one"))
            .await
            .unwrap();
        store
            .append_chunk("flight1", Bytes::from_static(b"two"))
            .await
            .unwrap();

        let pending = store.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "flight1");
        assert_eq!(pending[0].chunks, 2);
        assert_eq!(pending[0].bytes, 6);
    }

    #[tokio::test]
    async fn test_rescan_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RecoveryStore::open(dir.path()).await.unwrap();
            store
                .append_chunk("flight1", Bytes::from_static(b"abc"))
                .await
                .unwrap();
            store
                .append_chunk("flight2", Bytes::from_static(b"de"))
                .await
                .unwrap();
        }

        // A fresh store over the same root sees everything as pending.
        let store = RecoveryStore::open(dir.path()).await.unwrap();
        let pending = store.pending().await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].name, "flight1");
        assert_eq!(pending[0].bytes, 3);
    }

    #[tokio::test]
    async fn test_discard_removes_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::open(dir.path()).await.unwrap();
        store
            .append_chunk("flight1", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        store.discard("flight1").await.unwrap();
        assert!(store.pending().await.is_empty());
        assert!(!dir.path().join("flight1").exists());
    }

    #[tokio::test]
    async fn test_discard_unknown_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecoveryStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.discard("ghost").await,
            Err(RecoveryError::UnknownRecording(_))
        ));
    }
}
