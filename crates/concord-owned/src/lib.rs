//! Concord Owned Values
//!
//! Immutable envelopes for the results of concurrent inference branches.
//!
//! # Core Concepts
//!
//! - [`Owned<T>`]: value + confidence + scope tag + trace id
//! - [`ScopeTag`]: opaque trust-boundary label carried next to a value
//! - [`TraceId`]: audit-only identifier, never used in merge logic
//! - [`ShapeSignature`]: explicit structural fingerprint of a branch's output shape
//!
//! # Example
//!
//! ```rust
//! use concord_owned::{Owned, ScopeTag};
//!
//! let owned = Owned::new("urgent".to_string(), 0.9, "user").unwrap();
//! assert_eq!(owned.value(), "urgent");
//!
//! let bridged = owned.bridge(&ScopeTag::new("system"));
//! assert_eq!(bridged.scope().as_str(), "system|user");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod owned;
mod scope;
mod signature;

pub use owned::{clamp_unit, Owned, OwnedError};
pub use scope::{ScopeTag, TraceId, MERGED_SCOPE};
pub use signature::{ShapeSignature, SignatureError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
