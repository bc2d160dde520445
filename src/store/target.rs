//! Chunked target store layout and writer.
//!
//! A target is a prefix inside an object store holding:
//!
//! ```text
//! <prefix>/layout.json     geometry document, written by prepare()
//! <prefix>/c/<index>       one object per chunk
//! <prefix>/manifest.json   consolidated manifest, written by finalize()
//! ```
//!
//! Chunk objects are independent, so concurrent writes to distinct chunk
//! indices need no coordination; the layout maps each index to exactly one
//! object, which is what makes distinct keys non-overlapping.

use crate::error::RecipeError;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const LAYOUT_FILE: &str = "layout.json";
const MANIFEST_FILE: &str = "manifest.json";
const CHUNK_DIR: &str = "c";

/// Geometry of a chunked target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLayout {
    /// Total number of records across all chunks
    pub total_records: u64,

    /// Size of one record in bytes
    pub record_bytes: u64,

    /// Number of records per chunk (the last chunk may be shorter)
    pub records_per_chunk: u64,
}

impl TargetLayout {
    /// Number of chunks this layout produces.
    pub fn num_chunks(&self) -> u64 {
        self.total_records.div_ceil(self.records_per_chunk)
    }

    /// Number of records in chunk `index` (accounts for a short last chunk).
    pub fn chunk_records(&self, index: u64) -> u64 {
        let start = index * self.records_per_chunk;
        let end = (start + self.records_per_chunk).min(self.total_records);
        end.saturating_sub(start)
    }

    /// Expected byte length of chunk `index`.
    pub fn chunk_bytes(&self, index: u64) -> u64 {
        self.chunk_records(index) * self.record_bytes
    }
}

/// Consolidated manifest written at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetManifest {
    /// The target geometry
    pub layout: TargetLayout,

    /// Number of chunk objects present at finalization
    pub chunk_count: u64,

    /// Sorted indices of the chunk objects present
    pub chunks: Vec<u64>,

    /// Whether the target is complete
    pub complete: bool,
}

/// Writer for a chunked target on any object store.
///
/// Chunk writes to distinct indices are independent and may run concurrently;
/// the underlying store arbitrates access to the storage backend.
pub struct ChunkTarget {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    layout: TargetLayout,
}

impl ChunkTarget {
    /// Create a handle for a target at `prefix` with the given geometry.
    /// Nothing is written until [`ChunkTarget::prepare`] runs.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, layout: TargetLayout) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            layout,
        }
    }

    /// The target geometry.
    pub fn layout(&self) -> &TargetLayout {
        &self.layout
    }

    /// Number of chunks the target holds when complete.
    pub fn num_chunks(&self) -> u64 {
        self.layout.num_chunks()
    }

    fn object_path(&self, rel: &str) -> Path {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            Path::from(rel)
        } else {
            Path::from(format!("{}/{}", prefix, rel))
        }
    }

    fn layout_path(&self) -> Path {
        self.object_path(LAYOUT_FILE)
    }

    fn manifest_path(&self) -> Path {
        self.object_path(MANIFEST_FILE)
    }

    fn chunk_path(&self, index: u64) -> Path {
        self.object_path(&format!("{}/{}", CHUNK_DIR, index))
    }

    /// Idempotent target setup: write the layout document if the target does
    /// not exist, validate it if it does. An existing target with a different
    /// layout cannot be reconciled and fails.
    pub async fn prepare(&self) -> Result<(), RecipeError> {
        let path = self.layout_path();

        match self.store.head(&path).await {
            Ok(_) => {
                let existing = self
                    .store
                    .get(&path)
                    .await
                    .map_err(RecipeError::target_initialization)?
                    .bytes()
                    .await
                    .map_err(RecipeError::target_initialization)?;
                let existing: TargetLayout = serde_json::from_slice(&existing)
                    .map_err(RecipeError::target_initialization)?;

                if existing != self.layout {
                    return Err(RecipeError::TargetInitialization(format!(
                        "existing target layout {:?} does not match requested layout {:?}",
                        existing, self.layout
                    )));
                }

                tracing::debug!("Existing target at '{}' is compatible, resuming", self.prefix);
                Ok(())
            }
            Err(object_store::Error::NotFound { .. }) => {
                let body = serde_json::to_vec_pretty(&self.layout)
                    .map_err(RecipeError::target_initialization)?;
                self.store
                    .put(&path, body.into())
                    .await
                    .map_err(RecipeError::target_initialization)?;

                tracing::info!(
                    "Initialized target at '{}': {} chunks of {} records",
                    self.prefix,
                    self.layout.num_chunks(),
                    self.layout.records_per_chunk
                );
                Ok(())
            }
            Err(e) => Err(RecipeError::target_initialization(e)),
        }
    }

    /// Write one chunk object. The payload length must match the layout's
    /// expected byte length for that index.
    pub async fn write_chunk(&self, index: u64, data: Bytes) -> Result<(), RecipeError> {
        let expected = self.layout.chunk_bytes(index);
        if data.len() as u64 != expected {
            return Err(RecipeError::ChunkWrite {
                key: index.to_string(),
                message: format!("expected {} bytes, got {}", expected, data.len()),
            });
        }

        self.store
            .put(&self.chunk_path(index), data.into())
            .await
            .map_err(|e| RecipeError::chunk_write(index, e))?;
        Ok(())
    }

    /// Read one chunk object back.
    pub async fn read_chunk(&self, index: u64) -> anyhow::Result<Bytes> {
        Ok(self
            .store
            .get(&self.chunk_path(index))
            .await?
            .bytes()
            .await?)
    }

    /// Write the consolidated manifest. Must run after every chunk write has
    /// completed; the manifest records exactly the chunk objects present.
    pub async fn finalize(&self) -> Result<(), RecipeError> {
        let chunk_prefix = self.object_path(CHUNK_DIR);
        let objects: Vec<_> = self
            .store
            .list(Some(&chunk_prefix))
            .try_collect()
            .await
            .map_err(RecipeError::finalization)?;

        let mut chunks: Vec<u64> = objects
            .iter()
            .filter_map(|meta| {
                meta.location
                    .filename()
                    .and_then(|name| name.parse::<u64>().ok())
            })
            .collect();
        chunks.sort_unstable();

        let manifest = TargetManifest {
            layout: self.layout.clone(),
            chunk_count: chunks.len() as u64,
            chunks,
            complete: true,
        };

        let body = serde_json::to_vec_pretty(&manifest).map_err(RecipeError::finalization)?;
        self.store
            .put(&self.manifest_path(), body.into())
            .await
            .map_err(RecipeError::finalization)?;

        tracing::info!(
            "Finalized target at '{}': {} chunk(s) present",
            self.prefix,
            manifest.chunk_count
        );
        Ok(())
    }

    /// Read the consolidated manifest, if finalization has run.
    pub async fn manifest(&self) -> anyhow::Result<Option<TargetManifest>> {
        match self.store.get(&self.manifest_path()).await {
            Ok(result) => {
                let body = result.bytes().await?;
                Ok(Some(serde_json::from_slice(&body)?))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
