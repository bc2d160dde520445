//! The staged execution plan: stages, pipelines and parallel pipelines.
//!
//! A plan is a declarative partial order over recipe invocations:
//!
//! ```text
//! ParallelPipelines          no ordering between member pipelines
//! └── Pipeline               strict completion barrier between stages
//!     ├── Stage (mapped)     one invocation per key, any order within
//!     └── Stage (singleton)  exactly one invocation, no key
//! ```
//!
//! Stage functions are boxed async closures so a plan carries no knowledge of
//! the recipe that produced it; any executor that respects the ordering
//! contract can consume it. Plans are immutable after construction.

use crate::error::RecipeError;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Future returned by one stage invocation.
pub type StageFuture = BoxFuture<'static, Result<(), RecipeError>>;

/// The function bound to a stage. Mapped stages receive `Some(key)` per
/// invocation; singleton stages are invoked once with `None`.
pub type StageFn<K> = Arc<dyn Fn(Option<K>) -> StageFuture + Send + Sync>;

/// One unit of sequencing: a function plus an optional ordered key list.
///
/// With `keys` absent the stage is a *singleton* (one invocation, no key).
/// With `keys` present it is *mapped*: one invocation per key, where an empty
/// key list is a legal stage contributing zero invocations. Keys are opaque;
/// duplicates are not rejected and order is preserved from the enumeration
/// that produced them.
#[derive(Clone)]
pub struct Stage<K> {
    name: &'static str,
    function: StageFn<K>,
    keys: Option<Vec<K>>,
}

impl<K> Stage<K> {
    /// Create a singleton stage invoked exactly once with no key.
    pub fn singleton<F>(name: &'static str, function: F) -> Self
    where
        F: Fn(Option<K>) -> StageFuture + Send + Sync + 'static,
    {
        Self {
            name,
            function: Arc::new(function),
            keys: None,
        }
    }

    /// Create a mapped stage fanned out over `keys` in enumeration order.
    pub fn mapped<F>(name: &'static str, function: F, keys: Vec<K>) -> Self
    where
        F: Fn(Option<K>) -> StageFuture + Send + Sync + 'static,
    {
        Self {
            name,
            function: Arc::new(function),
            keys: Some(keys),
        }
    }

    /// Diagnostic label for this stage. Carries no scheduling semantics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The key list, or `None` for a singleton stage.
    pub fn keys(&self) -> Option<&[K]> {
        self.keys.as_deref()
    }

    /// Whether this stage fans out over a key list.
    pub fn is_mapped(&self) -> bool {
        self.keys.is_some()
    }

    /// Number of invocations this stage contributes: 1 for a singleton,
    /// the key count for a mapped stage (possibly zero).
    pub fn invocations(&self) -> usize {
        self.keys.as_ref().map_or(1, Vec::len)
    }

    /// Start one invocation of the stage function.
    pub fn invoke(&self, key: Option<K>) -> StageFuture {
        (self.function)(key)
    }
}

impl<K: fmt::Debug> fmt::Debug for Stage<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

/// An ordered sequence of stages with a strict completion barrier between
/// consecutive stages: no invocation of stage N+1 may begin until every
/// invocation of stage N has returned successfully.
#[derive(Debug, Clone)]
pub struct Pipeline<K> {
    stages: Vec<Stage<K>>,
}

impl<K> Pipeline<K> {
    /// Wrap an ordered stage sequence.
    pub fn new(stages: Vec<Stage<K>>) -> Self {
        Self { stages }
    }

    /// The stages in execution order.
    pub fn stages(&self) -> &[Stage<K>] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Total invocation count across all stages.
    pub fn total_invocations(&self) -> usize {
        self.stages.iter().map(Stage::invocations).sum()
    }
}

/// Independent pipelines with no temporal relationship between them: an
/// executor may interleave, parallelize or serialize members arbitrarily.
#[derive(Debug, Clone)]
pub struct ParallelPipelines<K> {
    pipelines: Vec<Pipeline<K>>,
}

impl<K> ParallelPipelines<K> {
    /// Collection containing a single pipeline.
    pub fn singleton(pipeline: Pipeline<K>) -> Self {
        Self {
            pipelines: vec![pipeline],
        }
    }

    /// The member pipelines.
    pub fn pipelines(&self) -> &[Pipeline<K>] {
        &self.pipelines
    }

    /// Number of member pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Total invocation count across all member pipelines.
    pub fn total_invocations(&self) -> usize {
        self.pipelines.iter().map(Pipeline::total_invocations).sum()
    }

    /// Consume the collection.
    pub fn into_pipelines(self) -> Vec<Pipeline<K>> {
        self.pipelines
    }
}
