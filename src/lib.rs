//! chunkforge
//!
//! Recipe-driven pipelines for converting archival datasets into chunked
//! stores. A recipe declares *what* work units exist (inputs and output
//! chunks) and *how* to process one unit; the engine compiles that into a
//! staged, parallelizable plan and runs it.
//!
//! # Architecture
//!
//! - **Recipe**: the contract any conversion procedure implements
//!   (enumerate inputs, cache an input, prepare the target, enumerate
//!   chunks, store a chunk, finalize)
//! - **Pipeline**: the plan model and the recipe-to-plan translator, plus a
//!   local tokio executor with bounded concurrency and metrics
//! - **Store**: source/cache/target storage behind `object_store`, a chunked
//!   target layout, and an in-memory block cache
//!
//! # Usage
//!
//! ```no_run
//! use chunkforge::{run, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     run(config).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod recipe;
pub mod store;

pub use config::Config;
pub use error::RecipeError;
pub use pipeline::{
    translate, ExecutorConfig, ExecutorStats, LocalExecutor, Metrics, ParallelPipelines, Pipeline,
    Stage,
};
pub use recipe::{FileSequenceRecipe, Recipe};
pub use store::{ChunkTarget, InputCache, TargetLayout};

use anyhow::Result;
use std::sync::Arc;

/// Build the configured recipe and its store collaborators.
pub fn build_recipe(config: &Config, metrics: Option<Arc<Metrics>>) -> Result<FileSequenceRecipe> {
    let source = store::create_source_store(config)?;
    let target_store = store::create_target_store(config)?;
    let target_prefix = store::target_prefix(config).to_string();

    let mut recipe = FileSequenceRecipe::new(
        source,
        config.source.inputs.clone(),
        config.source.record_bytes,
        config.source.records_per_input,
        target_store,
        target_prefix,
        config.target.records_per_chunk,
    )
    .with_block_cache_bytes((config.cache.block_cache_gb * 1024.0 * 1024.0 * 1024.0) as u64);

    if config.cache.enabled {
        let cache_store = store::create_cache_store(config)?;
        let prefix = config.cache.prefix.clone().unwrap_or_default();
        recipe = recipe.with_cache(InputCache::new(cache_store, prefix));
    }

    if let Some(metrics) = metrics {
        recipe = recipe.with_metrics(metrics);
    }

    Ok(recipe)
}

/// Run the full conversion pipeline with the given configuration.
pub async fn run(config: Config) -> Result<ExecutorStats> {
    // Validate configuration
    config.validate()?;

    tracing::info!("Starting conversion pipeline");
    tracing::info!(
        "Source: {} input(s), target: {}",
        config.source.inputs.len(),
        config.target.path_display()
    );

    let metrics = Metrics::new();
    let recipe = Arc::new(build_recipe(&config, Some(metrics.clone()))?);

    // Compile the recipe into its execution plan
    let plan = translate(recipe)?;
    let pipeline = &plan.pipelines()[0];
    tracing::info!(
        "Plan: {} stage(s), {} invocation(s)",
        pipeline.len(),
        pipeline.total_invocations()
    );

    // Run the plan
    let executor =
        LocalExecutor::with_metrics(ExecutorConfig::from(&config.execution), metrics);
    let stats = executor.execute(plan).await?;

    tracing::info!("Pipeline complete: {}", stats);

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
