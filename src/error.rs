//! Error classes for the recipe contract.
//!
//! Every failure a recipe operation can produce is classified into one of
//! these kinds at the contract boundary. The executor keys its retry policy
//! off the class: cache and chunk writes are per-key and retryable, while
//! enumeration, target initialization and finalization failures are fatal to
//! the whole run.

use std::fmt;
use thiserror::Error;

/// Failure classes for recipe operations.
#[derive(Debug, Error)]
pub enum RecipeError {
    /// An input or chunk enumeration failed, or an operation was invoked with
    /// a key the recipe does not recognize as part of its enumeration.
    #[error("enumeration failed: {0}")]
    Enumeration(String),

    /// The target exists in an incompatible state and cannot be reconciled,
    /// or could not be created.
    #[error("target initialization failed: {0}")]
    TargetInitialization(String),

    /// Copying one input into the cache failed.
    #[error("cache write failed for input {key}: {message}")]
    CacheWrite { key: String, message: String },

    /// Materializing or writing one target chunk failed.
    #[error("chunk write failed for chunk {key}: {message}")]
    ChunkWrite { key: String, message: String },

    /// Finalization failed after all chunks were written. Always fatal: a
    /// partially finalized target is in an ambiguous state.
    #[error("target finalization failed: {0}")]
    Finalization(String),
}

impl RecipeError {
    /// Classify an arbitrary error as an enumeration failure.
    pub fn enumeration(err: impl fmt::Display) -> Self {
        Self::Enumeration(err.to_string())
    }

    /// Classify an arbitrary error as a target initialization failure.
    pub fn target_initialization(err: impl fmt::Display) -> Self {
        Self::TargetInitialization(err.to_string())
    }

    /// Classify an arbitrary error as a cache write failure for `key`.
    pub fn cache_write(key: impl fmt::Debug, err: impl fmt::Display) -> Self {
        Self::CacheWrite {
            key: format!("{:?}", key),
            message: err.to_string(),
        }
    }

    /// Classify an arbitrary error as a chunk write failure for `key`.
    pub fn chunk_write(key: impl fmt::Debug, err: impl fmt::Display) -> Self {
        Self::ChunkWrite {
            key: format!("{:?}", key),
            message: err.to_string(),
        }
    }

    /// Classify an arbitrary error as a finalization failure.
    pub fn finalization(err: impl fmt::Display) -> Self {
        Self::Finalization(err.to_string())
    }

    /// Whether an executor may retry the failed invocation.
    ///
    /// Only per-key write failures are retryable. Enumeration and target
    /// lifecycle failures invalidate the run as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CacheWrite { .. } | Self::ChunkWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(RecipeError::cache_write(3usize, "timeout").is_retryable());
        assert!(RecipeError::chunk_write("c1", "timeout").is_retryable());
        assert!(!RecipeError::enumeration("boom").is_retryable());
        assert!(!RecipeError::target_initialization("boom").is_retryable());
        assert!(!RecipeError::finalization("boom").is_retryable());
    }

    #[test]
    fn test_display_includes_key() {
        let err = RecipeError::chunk_write(7usize, "connection reset");
        let text = err.to_string();
        assert!(text.contains("7"));
        assert!(text.contains("connection reset"));
    }
}
