//! The blob-store seam: addressed byte storage with attached metadata.
//!
//! Every object the pipeline writes carries key-value metadata — at
//! minimum the document id, and for per-fragment objects the fragment id —
//! so any blob found in storage can be traced back to its tracker record
//! without guessing from the key.
//!
//! Two implementations ship with the crate: [`MemoryBlobStore`] for tests
//! and embedding, and [`FsBlobStore`] for a local directory tree.
//! `FsBlobStore` writes are atomic (temp file + rename) so a crashed stage
//! never leaves a half-written object behind; metadata lives in a JSON
//! sidecar next to each object.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::PipelineError;

/// Well-known metadata keys, propagated onto every pipeline object.
pub const META_DOC_ID: &str = "doc-id";
pub const META_FRAG_ID: &str = "frag-id";
pub const META_LANDING_URI: &str = "landing-uri";
pub const META_CONTENT_TYPE: &str = "content-type";

/// Content types the pipeline writes.
pub const CONTENT_TYPE_PDF: &str = "application/pdf";
pub const CONTENT_TYPE_PNG: &str = "image/png";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Key-value metadata attached to a blob.
pub type BlobMeta = BTreeMap<String, String>;

/// Address of one object in the blob store.
///
/// Keys are `/`-separated and versionless; the layout is owned by
/// [`crate::workspace::Workspace`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        BlobRef(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Addressed byte storage with per-object metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object, replacing any existing one at the same key.
    async fn put(
        &self,
        blob: &BlobRef,
        bytes: Vec<u8>,
        meta: BlobMeta,
    ) -> Result<(), PipelineError>;

    /// Read an object's bytes. `MissingBlob` if absent.
    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, PipelineError>;

    /// Read an object's metadata. `MissingBlob` if absent.
    async fn meta(&self, blob: &BlobRef) -> Result<BlobMeta, PipelineError>;

    async fn exists(&self, blob: &BlobRef) -> Result<bool, PipelineError>;

    /// Size in bytes of an existing object.
    async fn size(&self, blob: &BlobRef) -> Result<u64, PipelineError>;

    /// Copy `src` to `dst`, merging `extra_meta` over the source metadata.
    async fn copy(
        &self,
        src: &BlobRef,
        dst: &BlobRef,
        extra_meta: BlobMeta,
    ) -> Result<(), PipelineError> {
        let bytes = self.get(src).await?;
        let mut meta = self.meta(src).await?;
        meta.extend(extra_meta);
        self.put(dst, bytes, meta).await
    }
}

// ── In-memory store ──────────────────────────────────────────────────────

/// Heap-backed [`BlobStore`] for tests and short-lived embedding.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (Vec<u8>, BlobMeta)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Vec<u8>, BlobMeta)>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        blob: &BlobRef,
        bytes: Vec<u8>,
        meta: BlobMeta,
    ) -> Result<(), PipelineError> {
        self.lock().insert(blob.as_str().to_string(), (bytes, meta));
        Ok(())
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, PipelineError> {
        self.lock()
            .get(blob.as_str())
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| PipelineError::MissingBlob {
                key: blob.as_str().to_string(),
            })
    }

    async fn meta(&self, blob: &BlobRef) -> Result<BlobMeta, PipelineError> {
        self.lock()
            .get(blob.as_str())
            .map(|(_, meta)| meta.clone())
            .ok_or_else(|| PipelineError::MissingBlob {
                key: blob.as_str().to_string(),
            })
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool, PipelineError> {
        Ok(self.lock().contains_key(blob.as_str()))
    }

    async fn size(&self, blob: &BlobRef) -> Result<u64, PipelineError> {
        self.lock()
            .get(blob.as_str())
            .map(|(bytes, _)| bytes.len() as u64)
            .ok_or_else(|| PipelineError::MissingBlob {
                key: blob.as_str().to_string(),
            })
    }
}

// ── Filesystem store ─────────────────────────────────────────────────────

/// Directory-backed [`BlobStore`].
///
/// Object bytes live at `<root>/<key>`; metadata lives in a
/// `<key>.meta.json` sidecar. Both are written atomically via a temp file
/// in the destination directory followed by a rename.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn object_path(&self, blob: &BlobRef) -> PathBuf {
        self.root.join(blob.as_str())
    }

    fn meta_path(&self, blob: &BlobRef) -> PathBuf {
        self.root.join(format!("{}.meta.json", blob.as_str()))
    }

    fn storage_err(blob: &BlobRef, err: std::io::Error) -> PipelineError {
        if err.kind() == std::io::ErrorKind::NotFound {
            PipelineError::MissingBlob {
                key: blob.as_str().to_string(),
            }
        } else {
            PipelineError::Storage {
                key: blob.as_str().to_string(),
                detail: err.to_string(),
            }
        }
    }

    async fn write_atomic(
        blob: &BlobRef,
        path: &Path,
        bytes: &[u8],
    ) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::storage_err(blob, e))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| Self::storage_err(blob, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Self::storage_err(blob, e))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        blob: &BlobRef,
        bytes: Vec<u8>,
        meta: BlobMeta,
    ) -> Result<(), PipelineError> {
        debug!("put {} ({} bytes)", blob, bytes.len());
        Self::write_atomic(blob, &self.object_path(blob), &bytes).await?;
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PipelineError::Storage {
                key: blob.as_str().to_string(),
                detail: e.to_string(),
            })?;
        Self::write_atomic(blob, &self.meta_path(blob), &meta_json).await
    }

    async fn get(&self, blob: &BlobRef) -> Result<Vec<u8>, PipelineError> {
        tokio::fs::read(self.object_path(blob))
            .await
            .map_err(|e| Self::storage_err(blob, e))
    }

    async fn meta(&self, blob: &BlobRef) -> Result<BlobMeta, PipelineError> {
        let bytes = tokio::fs::read(self.meta_path(blob))
            .await
            .map_err(|e| Self::storage_err(blob, e))?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::Storage {
            key: blob.as_str().to_string(),
            detail: format!("corrupt metadata sidecar: {e}"),
        })
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool, PipelineError> {
        match tokio::fs::metadata(self.object_path(blob)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::storage_err(blob, e)),
        }
    }

    async fn size(&self, blob: &BlobRef) -> Result<u64, PipelineError> {
        tokio::fs::metadata(self.object_path(blob))
            .await
            .map(|m| m.len())
            .map_err(|e| Self::storage_err(blob, e))
    }
}
