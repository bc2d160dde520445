//! Recipe that rechunks an ordered sequence of fixed-record source files.
//!
//! The source is an ordered list of objects, each holding the same number of
//! fixed-size records; together they form one contiguous record stream. The
//! target is that stream cut into chunks of `records_per_chunk` records, so a
//! chunk may span several inputs and several chunks may read one input:
//!
//! ```text
//! inputs:  [ a.bin (4 rec) ][ b.bin (4 rec) ]
//! chunks:  [ c0 (3 rec) ][ c1 (3 rec) ][ c2 (2 rec) ]
//! ```
//!
//! Input reads go through an in-memory block cache so concurrent chunk
//! assembly fetches each input once; with caching enabled the persistent
//! cache is the read source, with a fallback to the authoritative location.

use crate::error::RecipeError;
use crate::pipeline::Metrics;
use crate::recipe::Recipe;
use crate::store::{BlockCache, ChunkTarget, InputCache, TargetLayout};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use object_store::path::Path;
use object_store::ObjectStore;
use std::ops::Range;
use std::sync::Arc;

/// Default in-memory block cache budget (256 MB).
const DEFAULT_BLOCK_CACHE_BYTES: u64 = 256 * 1024 * 1024;

/// One input's contribution to a chunk: which input, and which of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRange {
    /// Index into the input enumeration
    pub input: usize,

    /// Byte range within that input
    pub bytes: Range<usize>,
}

/// Recipe converting a sequence of fixed-record source files into a chunked
/// target store.
pub struct FileSequenceRecipe {
    source: Arc<dyn ObjectStore>,
    inputs: Vec<String>,
    record_bytes: u64,
    records_per_input: u64,
    target: ChunkTarget,
    cache: Option<InputCache>,
    block_cache: BlockCache,
    metrics: Option<Arc<Metrics>>,
}

impl FileSequenceRecipe {
    /// Create a recipe over `inputs` (ordered object keys in `source`), each
    /// holding `records_per_input` records of `record_bytes`, writing chunks
    /// of `records_per_chunk` records into `target_store` under
    /// `target_prefix`.
    pub fn new(
        source: Arc<dyn ObjectStore>,
        inputs: Vec<String>,
        record_bytes: u64,
        records_per_input: u64,
        target_store: Arc<dyn ObjectStore>,
        target_prefix: impl Into<String>,
        records_per_chunk: u64,
    ) -> Self {
        let layout = TargetLayout {
            total_records: inputs.len() as u64 * records_per_input,
            record_bytes,
            records_per_chunk,
        };
        let target = ChunkTarget::new(target_store, target_prefix, layout);

        Self {
            source,
            inputs,
            record_bytes,
            records_per_input,
            target,
            cache: None,
            block_cache: BlockCache::new(DEFAULT_BLOCK_CACHE_BYTES, None),
            metrics: None,
        }
    }

    /// Stage inputs in `cache` before chunk assembly. Enables the
    /// input-caching stage of the plan.
    pub fn with_cache(mut self, cache: InputCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Bound the in-memory block cache at `max_bytes`.
    pub fn with_block_cache_bytes(mut self, max_bytes: u64) -> Self {
        self.block_cache = BlockCache::new(max_bytes, self.metrics.clone());
        self
    }

    /// Record throughput and cache metrics into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.block_cache = BlockCache::new(self.block_cache.max_bytes(), Some(metrics.clone()));
        self.metrics = Some(metrics);
        self
    }

    /// The target this recipe writes into.
    pub fn target(&self) -> &ChunkTarget {
        &self.target
    }

    /// Expected byte length of one input object.
    fn input_bytes(&self) -> u64 {
        self.records_per_input * self.record_bytes
    }

    fn check_input_key(&self, key: usize) -> Result<(), RecipeError> {
        if key >= self.inputs.len() {
            return Err(RecipeError::Enumeration(format!(
                "input key {} outside enumeration of {} inputs",
                key,
                self.inputs.len()
            )));
        }
        Ok(())
    }

    fn check_chunk_key(&self, key: usize) -> Result<(), RecipeError> {
        let num_chunks = self.target.num_chunks();
        if key as u64 >= num_chunks {
            return Err(RecipeError::Enumeration(format!(
                "chunk key {} outside enumeration of {} chunks",
                key, num_chunks
            )));
        }
        Ok(())
    }

    /// Map chunk `chunk` to the inputs and byte ranges that feed it, in
    /// record order. Empty for an out-of-range chunk.
    pub fn chunk_input_ranges(&self, chunk: usize) -> Vec<InputRange> {
        let layout = self.target.layout();
        let start = chunk as u64 * layout.records_per_chunk;
        let end = (start + layout.records_per_chunk).min(layout.total_records);
        if start >= end {
            return Vec::new();
        }

        let rpi = self.records_per_input;
        let first_input = (start / rpi) as usize;
        let last_input = ((end - 1) / rpi) as usize;

        (first_input..=last_input)
            .map(|i| {
                let input_start = i as u64 * rpi;
                let lo = start.max(input_start) - input_start;
                let hi = end.min(input_start + rpi) - input_start;
                InputRange {
                    input: i,
                    bytes: (lo * self.record_bytes) as usize..(hi * self.record_bytes) as usize,
                }
            })
            .collect()
    }

    /// Fetch one input's bytes from the authoritative source location.
    async fn fetch_from_source(&self, key: &str) -> anyhow::Result<Bytes> {
        Ok(self.source.get(&Path::from(key)).await?.bytes().await?)
    }

    /// Read one input through the block cache. Reads come from the persistent
    /// cache when enabled (falling back to the source for uncached entries),
    /// or from the source directly.
    async fn read_input(&self, index: usize) -> anyhow::Result<Bytes> {
        let key = &self.inputs[index];

        self.block_cache
            .get_or_fetch(key, || async {
                let data = if let Some(cache) = &self.cache {
                    if cache.contains(key).await? {
                        cache.get(key).await?
                    } else {
                        tracing::debug!("Input '{}' not cached, reading from source", key);
                        self.fetch_from_source(key).await?
                    }
                } else {
                    self.fetch_from_source(key).await?
                };

                if data.len() as u64 != self.input_bytes() {
                    anyhow::bail!(
                        "input '{}' is {} bytes, expected {}",
                        key,
                        data.len(),
                        self.input_bytes()
                    );
                }

                if let Some(ref m) = self.metrics {
                    m.add_bytes_read(data.len() as u64);
                }
                Ok(data)
            })
            .await
    }
}

#[async_trait]
impl Recipe for FileSequenceRecipe {
    type Key = usize;

    fn cache_inputs(&self) -> bool {
        self.cache.is_some()
    }

    fn iter_inputs(&self) -> Result<Vec<usize>, RecipeError> {
        Ok((0..self.inputs.len()).collect())
    }

    async fn cache_input(&self, key: usize) -> Result<(), RecipeError> {
        self.check_input_key(key)?;
        let cache = self
            .cache
            .as_ref()
            .ok_or_else(|| RecipeError::cache_write(key, "caching is not enabled"))?;
        let name = &self.inputs[key];

        if cache
            .contains(name)
            .await
            .map_err(|e| RecipeError::cache_write(key, e))?
        {
            tracing::debug!("Input '{}' already cached, skipping", name);
            return Ok(());
        }

        let data = self
            .fetch_from_source(name)
            .await
            .map_err(|e| RecipeError::cache_write(key, e))?;

        if data.len() as u64 != self.input_bytes() {
            return Err(RecipeError::cache_write(
                key,
                format!(
                    "input '{}' is {} bytes, expected {}",
                    name,
                    data.len(),
                    self.input_bytes()
                ),
            ));
        }

        let len = data.len() as u64;
        cache
            .put(name, data)
            .await
            .map_err(|e| RecipeError::cache_write(key, e))?;

        if let Some(ref m) = self.metrics {
            m.add_bytes_read(len);
            m.add_bytes_written(len);
        }
        Ok(())
    }

    async fn prepare_target(&self) -> Result<(), RecipeError> {
        self.target.prepare().await
    }

    fn iter_chunks(&self) -> Result<Vec<usize>, RecipeError> {
        Ok((0..self.target.num_chunks() as usize).collect())
    }

    async fn store_chunk(&self, key: usize) -> Result<(), RecipeError> {
        self.check_chunk_key(key)?;

        let ranges = self.chunk_input_ranges(key);
        let mut buf = BytesMut::with_capacity(self.target.layout().chunk_bytes(key as u64) as usize);

        for range in ranges {
            let block = self
                .read_input(range.input)
                .await
                .map_err(|e| RecipeError::chunk_write(key, e))?;
            buf.extend_from_slice(&block[range.bytes]);
        }

        let data = buf.freeze();
        let len = data.len() as u64;
        self.target.write_chunk(key as u64, data).await?;

        if let Some(ref m) = self.metrics {
            m.add_bytes_written(len);
        }
        Ok(())
    }

    async fn finalize_target(&self) -> Result<(), RecipeError> {
        self.target.finalize().await
    }
}
