//! End-to-end tests: recipe → translate → execute.

use crate::config::RetryConfig;
use crate::error::RecipeError;
use crate::pipeline::{translate, ExecutorConfig, LocalExecutor};
use crate::recipe::{FileSequenceRecipe, Recipe};
use crate::store::InputCache;
use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn quiet_executor() -> LocalExecutor {
    LocalExecutor::new(ExecutorConfig {
        concurrency: 4,
        retry: RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
        },
        enable_metrics: false,
        metrics_interval_secs: 10,
        metrics_output_path: None,
    })
}

/// Recipe that records every operation invocation into a shared log.
struct RecorderRecipe {
    cache_inputs: bool,
    inputs: Vec<String>,
    chunks: Vec<String>,
    events: Arc<Mutex<Vec<String>>>,
    fail_prepare: bool,
    /// Chunks that fail this many times before succeeding
    flaky_chunks: Mutex<HashMap<String, usize>>,
}

impl RecorderRecipe {
    fn new(cache_inputs: bool, inputs: &[&str], chunks: &[&str]) -> Self {
        Self {
            cache_inputs,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            chunks: chunks.iter().map(|s| s.to_string()).collect(),
            events: Arc::new(Mutex::new(Vec::new())),
            fail_prepare: false,
            flaky_chunks: Mutex::new(HashMap::new()),
        }
    }

    fn events(&self) -> Arc<Mutex<Vec<String>>> {
        self.events.clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Recipe for RecorderRecipe {
    type Key = String;

    fn cache_inputs(&self) -> bool {
        self.cache_inputs
    }

    fn iter_inputs(&self) -> Result<Vec<String>, RecipeError> {
        Ok(self.inputs.clone())
    }

    async fn cache_input(&self, key: String) -> Result<(), RecipeError> {
        self.record(format!("cache:{}", key));
        Ok(())
    }

    async fn prepare_target(&self) -> Result<(), RecipeError> {
        if self.fail_prepare {
            return Err(RecipeError::target_initialization("existing target is incompatible"));
        }
        self.record("prepare".to_string());
        Ok(())
    }

    fn iter_chunks(&self) -> Result<Vec<String>, RecipeError> {
        Ok(self.chunks.clone())
    }

    async fn store_chunk(&self, key: String) -> Result<(), RecipeError> {
        {
            let mut flaky = self.flaky_chunks.lock().unwrap();
            if let Some(remaining) = flaky.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RecipeError::chunk_write(&key, "transient failure"));
                }
            }
        }
        self.record(format!("store:{}", key));
        Ok(())
    }

    async fn finalize_target(&self) -> Result<(), RecipeError> {
        self.record("finalize".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_stage_barriers_are_respected() {
    let recipe = RecorderRecipe::new(true, &["i1", "i2", "i3"], &["c1", "c2", "c3", "c4"]);
    let events = recipe.events();

    let plan = translate(Arc::new(recipe)).unwrap();
    let stats = quiet_executor().execute(plan).await.unwrap();

    let events = events.lock().unwrap();
    let position = |event: &str| events.iter().position(|e| e == event).unwrap();

    // Every cache invocation completes before prepare starts
    let prepare = position("prepare");
    for input in ["i1", "i2", "i3"] {
        assert!(position(&format!("cache:{}", input)) < prepare);
    }

    // Every store invocation runs after prepare and before finalize
    let finalize = position("finalize");
    for chunk in ["c1", "c2", "c3", "c4"] {
        let store = position(&format!("store:{}", chunk));
        assert!(prepare < store && store < finalize);
    }

    // Finalize is last and runs exactly once
    assert_eq!(finalize, events.len() - 1);
    assert_eq!(events.iter().filter(|e| *e == "finalize").count(), 1);

    assert_eq!(stats.total_invocations, 9);
    assert_eq!(stats.invocations_completed, 9);
}

#[tokio::test]
async fn test_degenerate_empty_chunks_still_finalizes() {
    let recipe = RecorderRecipe::new(false, &[], &[]);
    let events = recipe.events();

    let plan = translate(Arc::new(recipe)).unwrap();
    let stats = quiet_executor().execute(plan).await.unwrap();

    assert_eq!(*events.lock().unwrap(), vec!["prepare", "finalize"]);
    assert_eq!(stats.total_invocations, 2);
    assert_eq!(stats.invocations_completed, 2);
}

#[tokio::test]
async fn test_transient_chunk_failures_are_retried() {
    let recipe = RecorderRecipe::new(false, &[], &["c1", "c2"]);
    recipe
        .flaky_chunks
        .lock()
        .unwrap()
        .insert("c2".to_string(), 2);
    let events = recipe.events();

    let executor = LocalExecutor::new(ExecutorConfig {
        concurrency: 2,
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        enable_metrics: false,
        metrics_interval_secs: 10,
        metrics_output_path: None,
    });

    let plan = translate(Arc::new(recipe)).unwrap();
    let stats = executor.execute(plan).await.unwrap();

    assert_eq!(stats.retries, 2);
    assert_eq!(stats.invocations_completed, 4);
    let events = events.lock().unwrap();
    assert!(events.contains(&"store:c2".to_string()));
    assert_eq!(*events.last().unwrap(), "finalize");
}

#[tokio::test]
async fn test_exhausted_retries_abort_pipeline() {
    let recipe = RecorderRecipe::new(false, &[], &["c1"]);
    recipe
        .flaky_chunks
        .lock()
        .unwrap()
        .insert("c1".to_string(), usize::MAX);
    let events = recipe.events();

    let executor = LocalExecutor::new(ExecutorConfig {
        concurrency: 2,
        retry: RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        enable_metrics: false,
        metrics_interval_secs: 10,
        metrics_output_path: None,
    });

    let plan = translate(Arc::new(recipe)).unwrap();
    let err = executor.execute(plan).await.unwrap_err();
    assert!(matches!(err, RecipeError::ChunkWrite { .. }));

    // Finalize never ran: the barrier holds on failure
    let events = events.lock().unwrap();
    assert!(!events.contains(&"finalize".to_string()));
}

#[tokio::test]
async fn test_fatal_prepare_stops_run_without_retry() {
    let mut recipe = RecorderRecipe::new(false, &[], &["c1"]);
    recipe.fail_prepare = true;
    let events = recipe.events();

    let plan = translate(Arc::new(recipe)).unwrap();
    let executor = quiet_executor();
    let err = executor.execute(plan).await.unwrap_err();

    assert!(matches!(err, RecipeError::TargetInitialization(_)));
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(executor.metrics().snapshot().retries, 0);
}

#[tokio::test]
async fn test_file_sequence_end_to_end_with_cache() {
    let source: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let cache_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let target_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    // 3 inputs of 4 one-byte records each: values 0..12
    let mut inputs = Vec::new();
    for i in 0..3u8 {
        let name = format!("part-{}.bin", i);
        let data: Vec<u8> = (i * 4..i * 4 + 4).collect();
        source.put(&Path::from(name.as_str()), data.into()).await.unwrap();
        inputs.push(name);
    }

    let recipe = FileSequenceRecipe::new(
        source,
        inputs.clone(),
        1, // record_bytes
        4,
        target_store,
        "converted",
        5, // 12 records -> chunks of 5, 5, 2
    )
    .with_cache(InputCache::new(cache_store.clone(), "staged"));

    let recipe = Arc::new(recipe);
    let plan = translate(Arc::clone(&recipe)).unwrap();

    // 3 cache + 1 prepare + 3 store + 1 finalize
    assert_eq!(plan.total_invocations(), 8);

    let stats = quiet_executor().execute(plan).await.unwrap();
    assert_eq!(stats.invocations_completed, 8);

    // Every input was staged in the cache store
    for name in &inputs {
        let staged = Path::from(format!("staged/{}", name));
        assert!(cache_store.head(&staged).await.is_ok());
    }

    // Chunk contents are the contiguous record stream, rechunked
    assert_eq!(&recipe.target().read_chunk(0).await.unwrap()[..], &[0, 1, 2, 3, 4]);
    assert_eq!(&recipe.target().read_chunk(1).await.unwrap()[..], &[5, 6, 7, 8, 9]);
    assert_eq!(&recipe.target().read_chunk(2).await.unwrap()[..], &[10, 11]);

    let manifest = recipe.target().manifest().await.unwrap().unwrap();
    assert!(manifest.complete);
    assert_eq!(manifest.chunk_count, 3);
}

#[tokio::test]
async fn test_rerun_resumes_compatible_target() {
    let source: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let target_store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());

    let name = "only.bin".to_string();
    source
        .put(&Path::from(name.as_str()), vec![1u8, 2, 3, 4].into())
        .await
        .unwrap();

    let make_recipe = || {
        Arc::new(FileSequenceRecipe::new(
            Arc::clone(&source),
            vec![name.clone()],
            1,
            4,
            Arc::clone(&target_store),
            "converted",
            2,
        ))
    };

    let plan = translate(make_recipe()).unwrap();
    quiet_executor().execute(plan).await.unwrap();

    // Same geometry translates and runs again against the existing target
    let plan = translate(make_recipe()).unwrap();
    let stats = quiet_executor().execute(plan).await.unwrap();
    assert_eq!(stats.invocations_completed, 4);
}
