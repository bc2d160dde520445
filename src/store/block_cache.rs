//! In-memory LRU block cache with single-flight deduplication.
//!
//! Chunk assembly fans out concurrently, and adjacent chunks often read the
//! same input block. This cache keeps recently fetched blocks in memory and
//! collapses concurrent fetches of the same key into one request: if a block
//! is already being fetched, new requesters wait on that result instead of
//! issuing a duplicate read.

use crate::pipeline::Metrics;
use anyhow::Result;
use bytes::Bytes;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// LRU cache of fetched input blocks keyed by block id.
pub struct BlockCache {
    /// Cached blocks
    cache: RwLock<LruCache<String, Bytes>>,

    /// In-flight requests (single-flight pattern)
    /// If a block is being fetched, new requesters subscribe to this broadcast
    in_flight: RwLock<HashMap<String, broadcast::Sender<Result<Bytes, String>>>>,

    /// Maximum cache size in bytes
    max_bytes: u64,

    /// Current cache size in bytes
    current_bytes: AtomicU64,

    /// Optional metrics for tracking cache performance
    metrics: Option<Arc<Metrics>>,
}

impl BlockCache {
    /// Create a new block cache bounded at `max_bytes`.
    pub fn new(max_bytes: u64, metrics: Option<Arc<Metrics>>) -> Self {
        // Entry-count capacity is a coarse upper bound; the byte budget is
        // what actually drives eviction.
        let estimated_block_size = 256 * 1024;
        let capacity = ((max_bytes / estimated_block_size as u64) as usize).max(1024);

        Self {
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1024).unwrap()),
            )),
            in_flight: RwLock::new(HashMap::new()),
            max_bytes,
            current_bytes: AtomicU64::new(0),
            metrics,
        }
    }

    /// Get a block from cache or fetch it using the provided function.
    ///
    /// If the block is already being fetched by another task, wait for that
    /// fetch to complete rather than issuing a duplicate request.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        // 1. Check cache first (fast path)
        {
            let mut cache = self.cache.write().await;
            if let Some(block) = cache.get(key) {
                if let Some(ref m) = self.metrics {
                    m.add_block_cache_hit();
                }
                return Ok(block.clone());
            }
        }

        // 2. Check if already in-flight (single-flight pattern)
        {
            let in_flight = self.in_flight.read().await;
            if let Some(sender) = in_flight.get(key) {
                // Someone else is fetching - wait for their result
                let mut rx = sender.subscribe();
                drop(in_flight);

                if let Some(ref m) = self.metrics {
                    m.add_block_cache_coalesced();
                }

                return match rx.recv().await {
                    Ok(Ok(block)) => Ok(block),
                    Ok(Err(e)) => Err(anyhow::anyhow!("Coalesced fetch failed: {}", e)),
                    Err(e) => Err(anyhow::anyhow!("Broadcast channel error: {}", e)),
                };
            }
        }

        // 3. We're the first - register in-flight and fetch
        let (tx, _) = broadcast::channel(16);
        {
            let mut in_flight = self.in_flight.write().await;
            in_flight.insert(key.to_string(), tx.clone());
        }

        // 4. Perform the actual fetch
        let result = fetch().await;

        // 5. Handle result
        match result {
            Ok(block) => {
                let block_size = block.len() as u64;

                self.evict_if_needed(block_size).await;

                {
                    let mut cache = self.cache.write().await;
                    cache.put(key.to_string(), block.clone());
                    self.current_bytes.fetch_add(block_size, Ordering::Relaxed);
                }

                if let Some(ref m) = self.metrics {
                    m.add_block_cache_miss();
                    m.set_block_cache_bytes(self.current_bytes.load(Ordering::Relaxed));
                }

                // Remove from in-flight and notify waiters
                {
                    let mut in_flight = self.in_flight.write().await;
                    in_flight.remove(key);
                }
                let _ = tx.send(Ok(block.clone()));

                Ok(block)
            }
            Err(e) => {
                // Remove from in-flight and notify waiters of failure
                {
                    let mut in_flight = self.in_flight.write().await;
                    in_flight.remove(key);
                }
                let _ = tx.send(Err(e.to_string()));

                Err(e)
            }
        }
    }

    /// Evict LRU entries until a new block of `new_block_size` bytes fits.
    async fn evict_if_needed(&self, new_block_size: u64) {
        let current = self.current_bytes.load(Ordering::Relaxed);
        if current + new_block_size <= self.max_bytes {
            return;
        }

        let mut cache = self.cache.write().await;
        while self.current_bytes.load(Ordering::Relaxed) + new_block_size > self.max_bytes {
            if let Some((_, evicted)) = cache.pop_lru() {
                self.current_bytes
                    .fetch_sub(evicted.len() as u64, Ordering::Relaxed);
            } else {
                break; // Cache is empty
            }
        }
    }

    /// Current cache size in bytes.
    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }

    /// Maximum cache size in bytes.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Number of cached blocks.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache holds no blocks.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Drop all cached blocks.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
        self.current_bytes.store(0, Ordering::Relaxed);
        if let Some(ref m) = self.metrics {
            m.set_block_cache_bytes(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(size: usize) -> Bytes {
        Bytes::from(vec![0u8; size])
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let cache = BlockCache::new(1024 * 1024, None);

        // First fetch - cache miss
        let first = cache
            .get_or_fetch("a.bin", || async { Ok(block(1000)) })
            .await
            .unwrap();

        // Second fetch - should be cache hit
        let second = cache
            .get_or_fetch("a.bin", || async { panic!("Should not be called") })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = BlockCache::new(2000, None); // Small cache to force eviction

        cache
            .get_or_fetch("a.bin", || async { Ok(block(800)) })
            .await
            .unwrap();
        cache
            .get_or_fetch("b.bin", || async { Ok(block(800)) })
            .await
            .unwrap();

        // This should evict the LRU entry
        cache
            .get_or_fetch("c.bin", || async { Ok(block(800)) })
            .await
            .unwrap();

        assert!(cache.current_bytes() <= 2000);
    }

    #[tokio::test]
    async fn test_single_flight() {
        use std::sync::atomic::AtomicUsize;

        let cache = Arc::new(BlockCache::new(1024 * 1024, None));
        let fetch_count = Arc::new(AtomicUsize::new(0));

        // Spawn multiple concurrent fetches for the same key
        let mut handles = vec![];
        for _ in 0..10 {
            let cache = cache.clone();
            let count = fetch_count.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("a.bin", || {
                        let count = count.clone();
                        async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                            Ok(block(1000))
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Note: Due to race conditions, it might be 1 or 2, but definitely not 10
        assert!(
            fetch_count.load(Ordering::SeqCst) <= 2,
            "Expected at most 2 fetches due to single-flight, got {}",
            fetch_count.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_fetch_error_not_cached() {
        let cache = BlockCache::new(1024 * 1024, None);

        let result = cache
            .get_or_fetch("a.bin", || async {
                Err(anyhow::anyhow!("Simulated fetch error"))
            })
            .await;
        assert!(result.is_err());

        // Failed fetches are not stored, so the next attempt fetches again
        let result = cache
            .get_or_fetch("a.bin", || async { Ok(block(100)) })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = BlockCache::new(1024 * 1024, None);
        cache
            .get_or_fetch("a.bin", || async { Ok(block(100)) })
            .await
            .unwrap();

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.current_bytes(), 0);
    }
}
