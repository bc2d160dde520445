//! Local plan execution with bounded concurrency.
//!
//! The executor consumes a [`ParallelPipelines`] value and honors its
//! ordering contract: member pipelines run concurrently with no mutual
//! ordering, stages within a pipeline run strictly in sequence, and the
//! invocations of a mapped stage are fanned out with bounded concurrency.
//! A stage must complete fully (every invocation returned Ok) before the
//! next stage starts.
//!
//! Failure policy: retryable invocation failures are retried with
//! exponential backoff per [`RetryConfig`]; fatal classes are surfaced
//! immediately. An invocation that exhausts its retry budget aborts the
//! whole run, which keeps the inter-stage barrier meaningful.

use crate::config::{ExecutionConfig, RetryConfig};
use crate::error::RecipeError;
use crate::pipeline::plan::{ParallelPipelines, Pipeline, Stage};
use crate::pipeline::{Metrics, MetricsReporter};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of concurrent invocations within one mapped stage
    pub concurrency: usize,

    /// Retry policy for retryable invocation failures
    pub retry: RetryConfig,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after the run completes
    pub metrics_output_path: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            retry: RetryConfig::default(),
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

impl From<&ExecutionConfig> for ExecutorConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            retry: config.retry.clone(),
            enable_metrics: config.enable_metrics,
            metrics_interval_secs: config.metrics_interval_secs,
            metrics_output_path: config.metrics_output_path.clone(),
        }
    }
}

/// Executor that runs a plan on the local tokio runtime.
pub struct LocalExecutor {
    /// Configuration
    config: ExecutorConfig,

    /// Metrics
    metrics: Arc<Metrics>,
}

impl LocalExecutor {
    /// Create a new executor with fresh metrics.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            metrics: Metrics::new(),
        }
    }

    /// Create a new executor recording into an existing metrics collector.
    pub fn with_metrics(config: ExecutorConfig, metrics: Arc<Metrics>) -> Self {
        Self { config, metrics }
    }

    /// The metrics collector for this executor.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Run every pipeline in the plan to completion.
    pub async fn execute<K>(&self, plan: ParallelPipelines<K>) -> Result<ExecutorStats, RecipeError>
    where
        K: Clone + fmt::Debug + Send + Sync + 'static,
    {
        let started = Instant::now();
        let num_pipelines = plan.len();
        let total_invocations = plan.total_invocations() as u64;

        tracing::info!(
            "Executing {} pipeline(s), {} invocation(s) ({} concurrent per stage)",
            num_pipelines,
            total_invocations,
            self.config.concurrency
        );

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_invocations,
            );
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        // Pipelines have no mutual ordering; run them concurrently
        let result = futures::future::try_join_all(
            plan.pipelines().iter().map(|pipeline| self.run_pipeline(pipeline)),
        )
        .await;

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(
                self.metrics.clone(),
                self.config.metrics_interval_secs,
                total_invocations,
            );
            reporter.print_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        result?;

        let snapshot = self.metrics.snapshot();
        Ok(ExecutorStats {
            pipelines: num_pipelines,
            total_invocations,
            invocations_completed: snapshot.invocations_completed,
            retries: snapshot.retries,
            elapsed: started.elapsed(),
        })
    }

    /// Run one pipeline's stages strictly in order.
    async fn run_pipeline<K>(&self, pipeline: &Pipeline<K>) -> Result<(), RecipeError>
    where
        K: Clone + fmt::Debug + Send + Sync + 'static,
    {
        for stage in pipeline.stages() {
            let started = Instant::now();

            match stage.keys() {
                None => {
                    self.invoke_with_retry(stage, None).await?;
                }
                Some(keys) => {
                    // Invocations within a mapped stage have no mutual
                    // ordering; fan out with bounded concurrency.
                    stream::iter(keys.iter().cloned())
                        .map(|key| self.invoke_with_retry(stage, Some(key)))
                        .buffer_unordered(self.config.concurrency)
                        .try_collect::<Vec<()>>()
                        .await?;
                }
            }

            self.metrics.add_stage_time(stage.name(), started.elapsed());
            tracing::debug!(
                "Stage {} complete ({} invocation(s))",
                stage.name(),
                stage.invocations()
            );
        }

        Ok(())
    }

    /// Run one invocation, retrying retryable failures with backoff.
    async fn invoke_with_retry<K>(
        &self,
        stage: &Stage<K>,
        key: Option<K>,
    ) -> Result<(), RecipeError>
    where
        K: Clone + fmt::Debug,
    {
        let retry = &self.config.retry;
        let mut backoff = retry.initial_backoff_ms;
        let mut attempt = 0;

        loop {
            match stage.invoke(key.clone()).await {
                Ok(()) => {
                    self.metrics.add_invocation_completed(stage.name());
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    self.metrics.add_retry();
                    tracing::warn!(
                        "Stage {} invocation for {:?} failed (attempt {}): {}, retrying in {}ms",
                        stage.name(),
                        key,
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(retry.max_backoff_ms);
                }
                Err(e) => {
                    self.metrics.add_invocation_failed();
                    return Err(e);
                }
            }
        }
    }
}

/// Statistics from an executor run.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Pipelines executed
    pub pipelines: usize,

    /// Total invocations in the plan
    pub total_invocations: u64,

    /// Invocations that returned successfully
    pub invocations_completed: u64,

    /// Invocation attempts that were retried
    pub retries: u64,

    /// Wall time of the run
    pub elapsed: Duration,
}

impl fmt::Display for ExecutorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pipelines: {}, Invocations: {}/{}, Retries: {}, Elapsed: {:.1}s",
            self.pipelines,
            self.invocations_completed,
            self.total_invocations,
            self.retries,
            self.elapsed.as_secs_f64()
        )
    }
}
