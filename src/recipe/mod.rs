//! The recipe contract.
//!
//! A recipe describes how to convert external source data into a chunked
//! target store through five lifecycle operations plus one capability flag.
//! The engine never looks inside the data; it only composes the operations
//! into a staged plan (see [`crate::pipeline::translate`]).
//!
//! Lifecycle order, as the translator composes it:
//!
//! ```text
//! cache_input(k)  for k in iter_inputs()     (only when cache_inputs())
//! prepare_target()
//! store_chunk(k)  for k in iter_chunks()
//! finalize_target()
//! ```
//!
//! A recipe can also be driven by hand, one operation at a time, in the same
//! order; the per-key operations tolerate concurrent invocation on distinct
//! keys.

mod file_sequence;

pub use file_sequence::{FileSequenceRecipe, InputRange};

use crate::error::RecipeError;
use async_trait::async_trait;
use std::fmt;
use std::hash::Hash;

/// A procedure for converting external source data into a chunked target.
///
/// Implementations define their own key space via [`Recipe::Key`]; keys are
/// opaque to the engine. The two enumerations must be finite, restartable and
/// deterministic for a given recipe configuration: the translator materializes
/// each exactly once and the resulting key list is what an executor fans out
/// over. Non-deterministic enumerations produce non-reproducible plans and are
/// a contract violation, not a supported feature.
///
/// `cache_input` and `store_chunk` must be safe to invoke concurrently for
/// distinct keys; distinct keys must map to non-overlapping regions of the
/// cache and target stores respectively. `finalize_target` is invoked exactly
/// once, strictly after every `store_chunk` invocation has returned.
#[async_trait]
pub trait Recipe: Send + Sync + 'static {
    /// Opaque identifier for one input or one target chunk.
    type Key: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Whether the plan includes the input-caching stage. When `false` the
    /// translator invokes neither `iter_inputs` nor `cache_input`, though a
    /// recipe may still use them for manual execution.
    fn cache_inputs(&self) -> bool {
        false
    }

    /// Enumerate every distinct input unit to read, in a stable order.
    fn iter_inputs(&self) -> Result<Vec<Self::Key>, RecipeError>;

    /// Copy one input's bytes from its authoritative source location into the
    /// cache entry addressed by `key`.
    async fn cache_input(&self, key: Self::Key) -> Result<(), RecipeError>;

    /// Idempotent target setup: create the target if absent, validate it if
    /// present. Fails with a [`RecipeError::TargetInitialization`] when an
    /// existing target is incompatible and cannot be reconciled.
    async fn prepare_target(&self) -> Result<(), RecipeError>;

    /// Enumerate every distinct target chunk to produce, in a stable order.
    fn iter_chunks(&self) -> Result<Vec<Self::Key>, RecipeError>;

    /// Read whatever source data is needed (directly or via the cache),
    /// transform it, and write chunk `key` into the target.
    async fn store_chunk(&self, key: Self::Key) -> Result<(), RecipeError>;

    /// Final step after all chunks are written, e.g. consolidated metadata.
    async fn finalize_target(&self) -> Result<(), RecipeError>;
}
