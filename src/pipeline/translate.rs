//! Translate a recipe into an executable staged plan.
//!
//! The translation is the only non-trivial logic between the recipe contract
//! and an executor: it reads the capability flag, materializes the two key
//! enumerations, and binds the five lifecycle operations into a fixed stage
//! order:
//!
//! 1. `cache-input` mapped over `iter_inputs()`, only when `cache_inputs()`
//! 2. `prepare-target` singleton
//! 3. `store-chunk` mapped over `iter_chunks()`
//! 4. `finalize-target` singleton
//!
//! Caching precedes target preparation so a failed cache pass never wastes an
//! expensive remote preparation; preparation precedes storage because chunk
//! writes require an initialized target; finalization follows all storage
//! because it may summarize the whole target. The order is a fixed invariant,
//! not configurable.
//!
//! The translator inspects key counts and order only, never key content: no
//! deduplication, no filtering. Empty enumerations are legal and yield mapped
//! stages with zero invocations. Each enumeration is called exactly once and
//! the materialized list is what executors fan out over; enumeration failures
//! surface immediately rather than producing a partial plan.

use crate::error::RecipeError;
use crate::pipeline::plan::{ParallelPipelines, Pipeline, Stage, StageFuture};
use crate::recipe::Recipe;
use std::sync::Arc;

/// Stage label for the input-caching stage.
pub const STAGE_CACHE_INPUT: &str = "cache-input";
/// Stage label for the target-preparation stage.
pub const STAGE_PREPARE_TARGET: &str = "prepare-target";
/// Stage label for the chunk-storage stage.
pub const STAGE_STORE_CHUNK: &str = "store-chunk";
/// Stage label for the finalization stage.
pub const STAGE_FINALIZE_TARGET: &str = "finalize-target";

fn missing_key_error(stage: &str) -> RecipeError {
    RecipeError::Enumeration(format!("mapped stage {} invoked without a key", stage))
}

/// Compile `recipe` into its execution plan: one pipeline, wrapped as the
/// sole member of a [`ParallelPipelines`] collection.
pub fn translate<R: Recipe>(recipe: Arc<R>) -> Result<ParallelPipelines<R::Key>, RecipeError> {
    let mut stages: Vec<Stage<R::Key>> = Vec::with_capacity(4);

    if recipe.cache_inputs() {
        let inputs = recipe.iter_inputs()?;
        let r = Arc::clone(&recipe);
        stages.push(Stage::mapped(
            STAGE_CACHE_INPUT,
            move |key| -> StageFuture {
                let r = Arc::clone(&r);
                Box::pin(async move {
                    let key = key.ok_or_else(|| missing_key_error(STAGE_CACHE_INPUT))?;
                    r.cache_input(key).await
                })
            },
            inputs,
        ));
    }

    let r = Arc::clone(&recipe);
    stages.push(Stage::singleton(
        STAGE_PREPARE_TARGET,
        move |_key| -> StageFuture {
            let r = Arc::clone(&r);
            Box::pin(async move { r.prepare_target().await })
        },
    ));

    let chunks = recipe.iter_chunks()?;
    let r = Arc::clone(&recipe);
    stages.push(Stage::mapped(
        STAGE_STORE_CHUNK,
        move |key| -> StageFuture {
            let r = Arc::clone(&r);
            Box::pin(async move {
                let key = key.ok_or_else(|| missing_key_error(STAGE_STORE_CHUNK))?;
                r.store_chunk(key).await
            })
        },
        chunks,
    ));

    let r = Arc::clone(&recipe);
    stages.push(Stage::singleton(
        STAGE_FINALIZE_TARGET,
        move |_key| -> StageFuture {
            let r = Arc::clone(&r);
            Box::pin(async move { r.finalize_target().await })
        },
    ));

    Ok(ParallelPipelines::singleton(Pipeline::new(stages)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Recipe whose operations only record that they ran.
    struct FakeRecipe {
        cache_inputs: bool,
        inputs: Vec<String>,
        chunks: Vec<String>,
        fail_chunk_enumeration: bool,
    }

    impl FakeRecipe {
        fn new(cache_inputs: bool, inputs: &[&str], chunks: &[&str]) -> Self {
            Self {
                cache_inputs,
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                chunks: chunks.iter().map(|s| s.to_string()).collect(),
                fail_chunk_enumeration: false,
            }
        }
    }

    #[async_trait]
    impl Recipe for FakeRecipe {
        type Key = String;

        fn cache_inputs(&self) -> bool {
            self.cache_inputs
        }

        fn iter_inputs(&self) -> Result<Vec<String>, RecipeError> {
            Ok(self.inputs.clone())
        }

        async fn cache_input(&self, _key: String) -> Result<(), RecipeError> {
            Ok(())
        }

        async fn prepare_target(&self) -> Result<(), RecipeError> {
            Ok(())
        }

        fn iter_chunks(&self) -> Result<Vec<String>, RecipeError> {
            if self.fail_chunk_enumeration {
                return Err(RecipeError::enumeration("chunk listing unavailable"));
            }
            Ok(self.chunks.clone())
        }

        async fn store_chunk(&self, _key: String) -> Result<(), RecipeError> {
            Ok(())
        }

        async fn finalize_target(&self) -> Result<(), RecipeError> {
            Ok(())
        }
    }

    fn stage_names<K>(plan: &ParallelPipelines<K>) -> Vec<&'static str> {
        plan.pipelines()[0]
            .stages()
            .iter()
            .map(|s| s.name())
            .collect()
    }

    #[test]
    fn test_without_caching_three_stages() {
        let recipe = Arc::new(FakeRecipe::new(false, &["i1"], &["c1", "c2", "c3"]));
        let plan = translate(recipe).unwrap();

        assert_eq!(plan.len(), 1);
        let pipeline = &plan.pipelines()[0];
        assert_eq!(pipeline.len(), 3);
        assert_eq!(
            stage_names(&plan),
            vec![STAGE_PREPARE_TARGET, STAGE_STORE_CHUNK, STAGE_FINALIZE_TARGET]
        );

        let store = &pipeline.stages()[1];
        let keys: Vec<_> = store.keys().unwrap().to_vec();
        assert_eq!(keys, vec!["c1", "c2", "c3"]);
    }

    #[test]
    fn test_with_caching_four_stages() {
        let recipe = Arc::new(FakeRecipe::new(true, &["i1", "i2"], &["c1"]));
        let plan = translate(recipe).unwrap();

        let pipeline = &plan.pipelines()[0];
        assert_eq!(pipeline.len(), 4);
        assert_eq!(
            stage_names(&plan),
            vec![
                STAGE_CACHE_INPUT,
                STAGE_PREPARE_TARGET,
                STAGE_STORE_CHUNK,
                STAGE_FINALIZE_TARGET
            ]
        );

        let cache = &pipeline.stages()[0];
        assert_eq!(cache.keys().unwrap(), &["i1".to_string(), "i2".to_string()][..]);
        let store = &pipeline.stages()[2];
        assert_eq!(store.keys().unwrap(), &["c1".to_string()][..]);
    }

    #[test]
    fn test_singleton_stages_carry_no_keys() {
        let recipe = Arc::new(FakeRecipe::new(true, &["i1"], &["c1"]));
        let plan = translate(recipe).unwrap();
        let pipeline = &plan.pipelines()[0];

        assert!(pipeline.stages()[1].keys().is_none());
        assert!(pipeline.stages()[3].keys().is_none());
        assert_eq!(pipeline.stages()[1].invocations(), 1);
        assert_eq!(pipeline.stages()[3].invocations(), 1);
    }

    #[test]
    fn test_finalize_last_prepare_before_store() {
        for cache_inputs in [false, true] {
            let recipe = Arc::new(FakeRecipe::new(cache_inputs, &["i1"], &["c1"]));
            let plan = translate(recipe).unwrap();
            let names = stage_names(&plan);

            assert_eq!(*names.last().unwrap(), STAGE_FINALIZE_TARGET);
            let prepare = names.iter().position(|n| *n == STAGE_PREPARE_TARGET).unwrap();
            let store = names.iter().position(|n| *n == STAGE_STORE_CHUNK).unwrap();
            assert!(prepare < store);
        }
    }

    #[test]
    fn test_empty_input_enumeration_keeps_stage() {
        let recipe = Arc::new(FakeRecipe::new(true, &[], &["c1"]));
        let plan = translate(recipe).unwrap();
        let pipeline = &plan.pipelines()[0];

        assert_eq!(pipeline.len(), 4);
        assert_eq!(pipeline.stages()[0].invocations(), 0);
    }

    #[test]
    fn test_degenerate_empty_chunks() {
        let recipe = Arc::new(FakeRecipe::new(false, &[], &[]));
        let plan = translate(recipe).unwrap();
        let pipeline = &plan.pipelines()[0];

        assert_eq!(pipeline.len(), 3);
        assert_eq!(pipeline.stages()[1].invocations(), 0);
        // prepare and finalize still contribute one invocation each
        assert_eq!(pipeline.total_invocations(), 2);
    }

    #[test]
    fn test_translation_is_idempotent() {
        let recipe = Arc::new(FakeRecipe::new(true, &["i1", "i2"], &["c1", "c2"]));
        let first = translate(Arc::clone(&recipe)).unwrap();
        let second = translate(recipe).unwrap();

        assert_eq!(stage_names(&first), stage_names(&second));
        let a = &first.pipelines()[0];
        let b = &second.pipelines()[0];
        for (sa, sb) in a.stages().iter().zip(b.stages()) {
            assert_eq!(sa.keys(), sb.keys());
            assert_eq!(sa.invocations(), sb.invocations());
        }
    }

    #[test]
    fn test_enumeration_failure_surfaces() {
        let mut recipe = FakeRecipe::new(false, &[], &["c1"]);
        recipe.fail_chunk_enumeration = true;
        let err = translate(Arc::new(recipe)).unwrap_err();
        assert!(matches!(err, RecipeError::Enumeration(_)));
    }

    #[test]
    fn test_caching_disabled_skips_input_enumeration() {
        /// Recipe whose input enumeration panics if consulted.
        struct NoInputs;

        #[async_trait]
        impl Recipe for NoInputs {
            type Key = u32;

            fn iter_inputs(&self) -> Result<Vec<u32>, RecipeError> {
                panic!("iter_inputs must not be called when caching is disabled");
            }

            async fn cache_input(&self, _key: u32) -> Result<(), RecipeError> {
                unreachable!()
            }

            async fn prepare_target(&self) -> Result<(), RecipeError> {
                Ok(())
            }

            fn iter_chunks(&self) -> Result<Vec<u32>, RecipeError> {
                Ok(vec![0, 1])
            }

            async fn store_chunk(&self, _key: u32) -> Result<(), RecipeError> {
                Ok(())
            }

            async fn finalize_target(&self) -> Result<(), RecipeError> {
                Ok(())
            }
        }

        let plan = translate(Arc::new(NoInputs)).unwrap();
        assert_eq!(plan.pipelines()[0].len(), 3);
    }

    #[tokio::test]
    async fn test_mapped_stage_rejects_missing_key() {
        let recipe = Arc::new(FakeRecipe::new(false, &[], &["c1"]));
        let plan = translate(recipe).unwrap();
        let store = &plan.pipelines()[0].stages()[1];

        let err = store.invoke(None).await.unwrap_err();
        assert!(matches!(err, RecipeError::Enumeration(_)));
    }
}
