//! In-memory registry of ingested files, with an optional disk mirror.

use std::path::PathBuf;

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::Result;

/// One ingested file. The raw bytes are kept out of every listing.
#[derive(Debug, Clone, Serialize)]
pub struct StoredFile {
    /// Content-hash id: first 8 bytes of the SHA-256, hex-encoded.
    pub id: String,
    /// Client-supplied file name.
    pub name: String,
    /// Stored size in bytes (after compression, when applied).
    pub size: u64,
    /// Uploading peer.
    pub peer_id: String,
    /// Ingestion time.
    pub uploaded_at: OffsetDateTime,
    /// Normalized content type.
    pub content_type: String,
    /// Detected process mode (wire code).
    pub process_mode: u8,
    /// Whether the stored bytes are gzip-compressed.
    pub is_compressed: bool,
    /// Free-form metadata.
    pub metadata: FxHashMap<String, String>,
    #[serde(skip)]
    bytes: Bytes,
}

impl StoredFile {
    /// Builds a record around the stored bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: String,
        peer_id: String,
        content_type: String,
        process_mode: u8,
        is_compressed: bool,
        metadata: FxHashMap<String, String>,
        bytes: Bytes,
    ) -> Self {
        Self {
            id,
            name,
            size: bytes.len() as u64,
            peer_id,
            uploaded_at: OffsetDateTime::now_utc(),
            content_type,
            process_mode,
            is_compressed,
            metadata,
            bytes,
        }
    }

    /// The stored bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

/// Registry keyed by content-hash id.
pub struct FileStore {
    files: RwLock<FxHashMap<String, StoredFile>>,
    mirror_dir: Option<PathBuf>,
}

impl FileStore {
    /// Store with an optional disk mirror under `mirror_dir`.
    pub fn new(mirror_dir: Option<PathBuf>) -> Self {
        Self {
            files: RwLock::new(FxHashMap::default()),
            mirror_dir,
        }
    }

    /// Inserts a file, mirroring it to disk when configured. Re-uploading
    /// the same content replaces the record.
    pub fn insert(&self, file: StoredFile) -> Result<()> {
        if let Some(dir) = &self.mirror_dir {
            let prefix = file
                .content_type
                .split('/')
                .next()
                .filter(|p| !p.is_empty())
                .unwrap_or("binary");
            let target = dir
                .join(prefix)
                .join(format!("{}_{}", file.id, sanitize_name(&file.name)));
            if let Err(err) = mirror_to_disk(&target, &file.bytes) {
                // The mirror is an external sink; the in-memory record
                // stays authoritative.
                warn!(path = %target.display(), %err, "store.mirror.failed");
            } else {
                debug!(path = %target.display(), "store.mirrored");
            }
        }
        self.files.write().insert(file.id.clone(), file);
        Ok(())
    }

    /// Looks up a file by id.
    pub fn get(&self, id: &str) -> Option<StoredFile> {
        self.files.read().get(id).cloned()
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<StoredFile> {
        let mut files: Vec<StoredFile> = self.files.read().values().cloned().collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(a.id.cmp(&b.id)));
        files
    }

    /// Case-insensitive substring match over file names, newest first.
    pub fn search(&self, query: &str) -> Vec<StoredFile> {
        let needle = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|file| file.name.to_lowercase().contains(&needle))
            .collect()
    }

    /// Number of stored files.
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

fn mirror_to_disk(target: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, bytes)
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
