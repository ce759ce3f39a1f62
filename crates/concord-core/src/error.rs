//! Error types for Concord Core
//!
//! Provides error handling for:
//! - Branch and warmup failures (propagated verbatim)
//! - Panicking branches
//! - Blocking schema conflicts
//! - Merge failures after a fork
//! - Configuration loading

use crate::schema::SchemaConflictReport;
use concord_merge::MergeError;

/// Fork orchestration error
#[derive(Debug, thiserror::Error)]
pub enum ForkError {
    /// A branch returned an error; the first one observed in declaration order
    #[error(transparent)]
    Branch(anyhow::Error),

    /// The warmup coordinator failed
    #[error(transparent)]
    Warmup(anyhow::Error),

    /// A branch task panicked
    #[error("branch {index} panicked")]
    BranchPanicked {
        /// Declaration index of the branch
        index: usize,
    },

    /// Branch output shapes differ and the policy is `error`
    #[error("schema conflict: {}", .0.message)]
    SchemaConflict(SchemaConflictReport),

    /// Merging the fork results failed
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ForkError {
    /// Check if error is raised before any branch runs
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::SchemaConflict(_) | Self::Config(_) => true,
            Self::Merge(e) => e.is_configuration(),
            _ => false,
        }
    }

    /// Check if the whole fork may succeed when re-issued
    ///
    /// Only execution failures qualify; the orchestrator itself never retries.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Branch(_) | Self::Warmup(_) | Self::BranchPanicked { .. })
    }
}
