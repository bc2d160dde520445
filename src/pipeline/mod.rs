//! Plan model, recipe-to-plan translation, and local execution.

mod executor;
mod metrics;
mod plan;
mod translate;

#[cfg(test)]
mod executor_integration_tests;

pub use executor::{ExecutorConfig, ExecutorStats, LocalExecutor};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use plan::{ParallelPipelines, Pipeline, Stage, StageFn, StageFuture};
pub use translate::{
    translate, STAGE_CACHE_INPUT, STAGE_FINALIZE_TARGET, STAGE_PREPARE_TARGET, STAGE_STORE_CHUNK,
};
