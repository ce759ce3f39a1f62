//! Scope tags and trace identifiers
//!
//! [`ScopeTag`] is an opaque trust-boundary label carried next to a value.
//! No compile-time enforcement is attached to it; it only travels with the
//! envelope so downstream code can audit where a value came from.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use ulid::Ulid;

/// Scope stamped onto every merge output
pub const MERGED_SCOPE: &str = "merged";

/// Opaque scope label
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeTag(String);

impl ScopeTag {
    /// Create a scope tag from any string
    #[inline]
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The scope stamped on merge outputs
    #[inline]
    #[must_use]
    pub fn merged() -> Self {
        Self(MERGED_SCOPE.to_string())
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether this is the merge scope
    #[inline]
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.0 == MERGED_SCOPE
    }

    /// Union of two scopes as a `a|b` tag
    ///
    /// Components are deduplicated and sorted so the union is
    /// order-independent: `a ∪ b == b ∪ a`.
    #[must_use]
    pub fn union(&self, other: &ScopeTag) -> ScopeTag {
        let mut parts: Vec<&str> = self
            .0
            .split('|')
            .chain(other.0.split('|'))
            .filter(|p| !p.is_empty())
            .collect();
        parts.sort_unstable();
        parts.dedup();
        ScopeTag(parts.join("|"))
    }

    /// Check whether this scope includes `component`
    #[must_use]
    pub fn contains(&self, component: &str) -> bool {
        self.0.split('|').any(|p| p == component)
    }
}

impl Display for ScopeTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeTag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Audit-only trace identifier (ULID for sortability)
///
/// Never used for any merge or scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TraceId(pub Ulid);

impl TraceId {
    /// Generate new trace ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
