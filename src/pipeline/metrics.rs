//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::pipeline::translate::{
    STAGE_CACHE_INPUT, STAGE_FINALIZE_TARGET, STAGE_PREPARE_TARGET, STAGE_STORE_CHUNK,
};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for a pipeline run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Total bytes read from source or cache stores
    pub bytes_read: AtomicU64,

    /// Total bytes written to cache and target stores
    pub bytes_written: AtomicU64,

    /// Inputs copied into the cache
    pub inputs_cached: AtomicU64,

    /// Chunks written to the target
    pub chunks_stored: AtomicU64,

    /// Stage invocations that returned successfully
    pub invocations_completed: AtomicU64,

    /// Stage invocations that failed after exhausting retries
    pub invocations_failed: AtomicU64,

    /// Invocation attempts that were retried
    pub retries: AtomicU64,

    /// Start time
    start_time: Option<Instant>,

    // Per-stage timing (in microseconds for precision)
    /// Wall time of the input-caching stage (microseconds)
    pub cache_input_us: AtomicU64,

    /// Wall time of the target-preparation stage (microseconds)
    pub prepare_us: AtomicU64,

    /// Wall time of the chunk-storage stage (microseconds)
    pub store_chunk_us: AtomicU64,

    /// Wall time of the finalization stage (microseconds)
    pub finalize_us: AtomicU64,

    // Block cache metrics
    /// Block cache hits
    pub block_cache_hits: AtomicU64,

    /// Block cache misses
    pub block_cache_misses: AtomicU64,

    /// Block cache coalesced requests (waited on an in-flight fetch)
    pub block_cache_coalesced: AtomicU64,

    /// Current block cache size in bytes
    pub block_cache_bytes: AtomicU64,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record bytes read.
    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record bytes written.
    pub fn add_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a completed invocation of the named stage.
    pub fn add_invocation_completed(&self, stage: &str) {
        self.invocations_completed.fetch_add(1, Ordering::Relaxed);
        match stage {
            STAGE_CACHE_INPUT => {
                self.inputs_cached.fetch_add(1, Ordering::Relaxed);
            }
            STAGE_STORE_CHUNK => {
                self.chunks_stored.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    /// Record a failed invocation.
    pub fn add_invocation_failed(&self) {
        self.invocations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried invocation attempt.
    pub fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record wall time spent in the named stage.
    pub fn add_stage_time(&self, stage: &str, duration: Duration) {
        let us = duration.as_micros() as u64;
        match stage {
            STAGE_CACHE_INPUT => self.cache_input_us.fetch_add(us, Ordering::Relaxed),
            STAGE_PREPARE_TARGET => self.prepare_us.fetch_add(us, Ordering::Relaxed),
            STAGE_STORE_CHUNK => self.store_chunk_us.fetch_add(us, Ordering::Relaxed),
            STAGE_FINALIZE_TARGET => self.finalize_us.fetch_add(us, Ordering::Relaxed),
            _ => 0,
        };
    }

    /// Record a block cache hit.
    pub fn add_block_cache_hit(&self) {
        self.block_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a block cache miss.
    pub fn add_block_cache_miss(&self) {
        self.block_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a coalesced block cache request (waited on an in-flight fetch).
    pub fn add_block_cache_coalesced(&self) {
        self.block_cache_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the current block cache size in bytes.
    pub fn set_block_cache_bytes(&self, bytes: u64) {
        self.block_cache_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get read throughput in MB/s.
    pub fn read_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_read.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (bytes as f64) / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Get write throughput in MB/s.
    pub fn write_throughput_mbps(&self) -> f64 {
        let bytes = self.bytes_written.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (bytes as f64) / (1024.0 * 1024.0) / elapsed
        } else {
            0.0
        }
    }

    /// Get completed invocations per second.
    pub fn invocations_per_second(&self) -> f64 {
        let done = self.invocations_completed.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            inputs_cached: self.inputs_cached.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            invocations_completed: self.invocations_completed.load(Ordering::Relaxed),
            invocations_failed: self.invocations_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            read_throughput_mbps: self.read_throughput_mbps(),
            write_throughput_mbps: self.write_throughput_mbps(),
            invocations_per_second: self.invocations_per_second(),
            cache_input_secs: self.cache_input_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            prepare_secs: self.prepare_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            store_chunk_secs: self.store_chunk_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            finalize_secs: self.finalize_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            block_cache_hits: self.block_cache_hits.load(Ordering::Relaxed),
            block_cache_misses: self.block_cache_misses.load(Ordering::Relaxed),
            block_cache_coalesced: self.block_cache_coalesced.load(Ordering::Relaxed),
            block_cache_bytes: self.block_cache_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub inputs_cached: u64,
    pub chunks_stored: u64,
    pub invocations_completed: u64,
    pub invocations_failed: u64,
    pub retries: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub read_throughput_mbps: f64,
    pub write_throughput_mbps: f64,
    pub invocations_per_second: f64,
    /// Wall time of the input-caching stage (seconds)
    pub cache_input_secs: f64,
    /// Wall time of the target-preparation stage (seconds)
    pub prepare_secs: f64,
    /// Wall time of the chunk-storage stage (seconds)
    pub store_chunk_secs: f64,
    /// Wall time of the finalization stage (seconds)
    pub finalize_secs: f64,
    /// Block cache hits
    pub block_cache_hits: u64,
    /// Block cache misses
    pub block_cache_misses: u64,
    /// Block cache coalesced (single-flight deduplication)
    pub block_cache_coalesced: u64,
    /// Block cache size in bytes
    pub block_cache_bytes: u64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total_stage_time =
            self.cache_input_secs + self.prepare_secs + self.store_chunk_secs + self.finalize_secs;
        let (cache_pct, store_pct) = if total_stage_time > 0.0 {
            (
                self.cache_input_secs / total_stage_time * 100.0,
                self.store_chunk_secs / total_stage_time * 100.0,
            )
        } else {
            (0.0, 0.0)
        };

        let block_total =
            self.block_cache_hits + self.block_cache_misses + self.block_cache_coalesced;
        let block_hit_rate = if block_total > 0 {
            (self.block_cache_hits + self.block_cache_coalesced) as f64 / block_total as f64 * 100.0
        } else {
            0.0
        };

        write!(
            f,
            "Cached: {} inputs | Stored: {} chunks | \
             Read: {:.2} MB @ {:.2} MB/s | Write: {:.2} MB @ {:.2} MB/s | \
             Rate: {:.1} inv/s | Failures: {} | Retries: {} | Elapsed: {:.1}s | \
             Time: cache {:.0}% store {:.0}% | Block cache: {:.0}%",
            self.inputs_cached,
            self.chunks_stored,
            self.bytes_read as f64 / (1024.0 * 1024.0),
            self.read_throughput_mbps,
            self.bytes_written as f64 / (1024.0 * 1024.0),
            self.write_throughput_mbps,
            self.invocations_per_second,
            self.invocations_failed,
            self.retries,
            self.elapsed.as_secs_f64(),
            cache_pct,
            store_pct,
            block_hit_rate,
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
    total_invocations: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64, total_invocations: u64) -> Self {
        Self {
            metrics,
            interval_secs,
            total_invocations,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let progress = if self.total_invocations > 0 {
                        snapshot.invocations_completed as f64
                            / self.total_invocations as f64
                            * 100.0
                    } else {
                        0.0
                    };

                    tracing::info!("[{:.1}%] {}", progress, snapshot);
                }
                _ = shutdown.recv() => {
                    let snapshot = self.metrics.snapshot();
                    tracing::info!("Final: {}", snapshot);
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Run Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Inputs cached: {}", snapshot.inputs_cached);
        println!("Chunks stored: {}", snapshot.chunks_stored);
        println!(
            "Data read: {:.2} MB",
            snapshot.bytes_read as f64 / (1024.0 * 1024.0)
        );
        println!(
            "Data written: {:.2} MB",
            snapshot.bytes_written as f64 / (1024.0 * 1024.0)
        );
        println!("Read throughput: {:.2} MB/s", snapshot.read_throughput_mbps);
        println!(
            "Write throughput: {:.2} MB/s",
            snapshot.write_throughput_mbps
        );
        println!("Failures: {}", snapshot.invocations_failed);
        println!("Retries: {}", snapshot.retries);

        let total_stage = snapshot.cache_input_secs
            + snapshot.prepare_secs
            + snapshot.store_chunk_secs
            + snapshot.finalize_secs;
        if total_stage > 0.0 {
            println!("\n--- Stage Time Breakdown ---");
            println!(
                "Cache inputs: {:>7.1}s ({:>5.1}%)",
                snapshot.cache_input_secs,
                snapshot.cache_input_secs / total_stage * 100.0
            );
            println!(
                "Prepare:      {:>7.1}s ({:>5.1}%)",
                snapshot.prepare_secs,
                snapshot.prepare_secs / total_stage * 100.0
            );
            println!(
                "Store chunks: {:>7.1}s ({:>5.1}%)",
                snapshot.store_chunk_secs,
                snapshot.store_chunk_secs / total_stage * 100.0
            );
            println!(
                "Finalize:     {:>7.1}s ({:>5.1}%)",
                snapshot.finalize_secs,
                snapshot.finalize_secs / total_stage * 100.0
            );
        }

        let block_total = snapshot.block_cache_hits
            + snapshot.block_cache_misses
            + snapshot.block_cache_coalesced;
        if block_total > 0 {
            let hit_rate = (snapshot.block_cache_hits + snapshot.block_cache_coalesced) as f64
                / block_total as f64
                * 100.0;
            println!("\n--- Block Cache ---");
            println!(
                "{} hits, {} misses, {} coalesced ({:.1}% effective hit rate)",
                snapshot.block_cache_hits,
                snapshot.block_cache_misses,
                snapshot.block_cache_coalesced,
                hit_rate
            );
            println!(
                "Size: {:.2} MB",
                snapshot.block_cache_bytes as f64 / (1024.0 * 1024.0)
            );
        }
        println!("===================\n");
    }
}
