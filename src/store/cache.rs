//! Persistent byte cache for staged inputs.
//!
//! The cache stages input bytes in faster or closer storage before chunk
//! assembly. Entries are addressed by input key; distinct keys map to
//! distinct objects, so concurrent writes for distinct keys need no
//! coordination.

use anyhow::Result;
use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use std::ops::Range;
use std::sync::Arc;

/// Byte cache on any object store, addressed by input key.
pub struct InputCache {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl InputCache {
    /// Create a cache rooted at `prefix` within `store`.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn entry_path(&self, key: &str) -> Path {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", prefix, key))
        }
    }

    /// Whether an entry for `key` exists.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.entry_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the entry for `key`, replacing any previous bytes.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store.put(&self.entry_path(key), data.into()).await?;
        Ok(())
    }

    /// Read the full entry for `key`.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        Ok(self.store.get(&self.entry_path(key)).await?.bytes().await?)
    }

    /// Read a byte range of the entry for `key`.
    pub async fn get_range(&self, key: &str, range: Range<usize>) -> Result<Bytes> {
        Ok(self.store.get_range(&self.entry_path(key), range).await?)
    }
}
