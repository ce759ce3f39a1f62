//! Concord Merge Engine
//!
//! Reduces the ordered outputs of a fork into one value, with confidence,
//! consensus level, provenance and conflict records.
//!
//! # Core Concepts
//!
//! - [`MergeStrategy`]: Core trait implemented by every strategy
//! - [`MergeResult`]: Merged [`Owned`](concord_owned::Owned) value plus [`Provenance`] and [`Conflict`]s
//! - [`categorical`]: Confidence-weighted vote over discrete values
//! - [`continuous`]: Confidence-weighted average with outlier removal
//! - [`object`]: Field-by-field merge of structured records
//! - [`array`]: Concatenation with de-duplication
//! - [`custom`]: Caller-supplied reducer
//! - [`consensus`]: k-of-n agreement requirement
//! - [`MergeSpec`]: Strategy selection from TOML/JSON
//!
//! # Example
//!
//! ```rust
//! use concord_merge::categorical::{weighted_vote, VoteOptions};
//! use concord_merge::MergeStrategy;
//! use concord_owned::Owned;
//!
//! let results = vec![
//!     Owned::new("urgent", 0.9, "a").unwrap(),
//!     Owned::new("normal", 0.7, "b").unwrap(),
//!     Owned::new("urgent", 0.8, "c").unwrap(),
//! ];
//! let merged = weighted_vote(VoteOptions::default()).merge(&results).unwrap();
//! assert_eq!(*merged.value(), "urgent");
//! assert_eq!(merged.provenance.contributing_branches, vec![0, 2]);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod array;
pub mod categorical;
pub mod consensus;
pub mod continuous;
pub mod custom;
pub mod object;

mod config;
mod filter;
mod registry;
mod strategy;

// Re-exports
pub use config::{JsonStrategy, MergeSpec};
pub use registry::{StrategyRegistry, BUILTIN_STRATEGIES};
pub use strategy::{
    Conflict, MergeError, MergeResult, MergeStrategy, NumericSummary, Provenance, RejectedValue,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
