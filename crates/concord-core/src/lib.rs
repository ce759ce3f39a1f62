//! Concord Core - fork orchestration
//!
//! Issues several independent inference operations that share one logical
//! context, then reduces their outputs with a merge strategy.
//!
//! # Core Concepts
//!
//! - [`ForkOrchestrator`]: Runs branches under a [`ForkStrategy`], returning ordered results
//! - [`InferenceContext`]: What each branch receives; [`ScopedContext`] is the in-memory one
//! - [`WarmupCoordinator`]: Provider hook that primes a shared prompt cache
//! - [`detect_schema_conflicts`]: Flags branches whose output shapes defeat cache sharing
//! - [`ForkConfig`]: Serializable fork policy
//!
//! # Example
//!
//! ```rust
//! use concord_core::{ForkBranch, ForkOptions, ForkOrchestrator, InferenceContext, ScopedContext};
//! use concord_merge::categorical::{weighted_vote, VoteOptions};
//! use concord_owned::Owned;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = ScopedContext::new("triage");
//! let branches = [("urgent", 0.9), ("normal", 0.6), ("urgent", 0.8)].map(|(label, confidence)| {
//!     ForkBranch::new(move |ctx: ScopedContext| async move {
//!         Owned::new(label, confidence, ctx.scope().clone()).map_err(anyhow::Error::from)
//!     })
//! });
//!
//! let outcome = ForkOrchestrator::new()
//!     .fork_and_merge(
//!         &ctx,
//!         ForkOptions::fast_parallel().with_branches(branches),
//!         &weighted_vote(VoteOptions::default()),
//!     )
//!     .await?;
//! assert_eq!(*outcome.merge.value(), "urgent");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod fork;
pub mod schema;
pub mod warmup;

// Re-exports for convenience
pub use config::{ForkConfig, ForkStrategy, SchemaConflictPolicy, WarmupMode};
pub use context::{CacheSegment, InferenceContext, ScopedContext};
pub use error::ForkError;
pub use fork::{
    fork, fork_and_merge, BranchFuture, CacheStats, ForkBranch, ForkMergeOutcome, ForkOptions,
    ForkOrchestrator, ForkResult,
};
pub use schema::{detect_schema_conflicts, SchemaConflictReport};
pub use warmup::{
    clear_warmup_executor, get_warmup_executor, register_warmup_executor, WarmupCoordinator,
    WarmupReport,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Concord Core
    pub use crate::{
        ForkBranch, ForkConfig, ForkOptions, ForkOrchestrator, ForkStrategy, InferenceContext,
        ScopedContext, WarmupMode,
    };
    pub use concord_merge::MergeStrategy;
    pub use concord_owned::Owned;
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
