//! Inference context seam
//!
//! [`InferenceContext`] is what a branch receives. The orchestrator only
//! needs to derive one isolated child per branch; everything else about the
//! context (how inference calls are issued) belongs to the caller.

use concord_owned::{Owned, ScopeTag};
use serde::{Deserialize, Serialize};

/// Context shared by the branches of a fork
pub trait InferenceContext: Send + Sync + 'static {
    /// Scope identity of this context
    fn scope(&self) -> &ScopeTag;

    /// Branch index when this is a child view, `None` for a root context
    fn branch_index(&self) -> Option<usize>;

    /// Derive the isolated view handed to branch `index`
    ///
    /// The child inherits scope identity and everything staged so far.
    /// Nothing the child stages afterwards is visible to its parent or
    /// siblings.
    fn fork_child(&self, index: usize) -> Self
    where
        Self: Sized;

    /// Re-tag a value as usable within this context's scope
    fn bridge<T>(&self, owned: Owned<T>) -> Owned<T>
    where
        Self: Sized,
    {
        owned.bridge(self.scope())
    }
}

/// A prompt-cache segment staged on a context
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheSegment {
    /// Segment key (e.g. a system prompt identifier)
    pub key: String,

    /// Size of the segment in tokens
    pub tokens: u64,
}

impl CacheSegment {
    /// Create new segment
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>, tokens: u64) -> Self {
        Self {
            key: key.into(),
            tokens,
        }
    }
}

/// In-memory [`InferenceContext`]
///
/// Segments live in a persistent vector, so forking a child is O(1) and
/// children share structure with the parent until they stage their own.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedContext {
    scope: ScopeTag,
    segments: im::Vector<CacheSegment>,
    branch_index: Option<usize>,
}

impl ScopedContext {
    /// Create new root context
    #[inline]
    #[must_use]
    pub fn new(scope: impl Into<ScopeTag>) -> Self {
        Self {
            scope: scope.into(),
            segments: im::Vector::new(),
            branch_index: None,
        }
    }

    /// Stage a cache segment on this view
    pub fn stage(&mut self, segment: CacheSegment) {
        self.segments.push_back(segment);
    }

    /// With a staged segment
    #[inline]
    #[must_use]
    pub fn with_segment(mut self, segment: CacheSegment) -> Self {
        self.stage(segment);
        self
    }

    /// Segments visible to this view
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &im::Vector<CacheSegment> {
        &self.segments
    }

    /// Total tokens across visible segments
    #[must_use]
    pub fn staged_tokens(&self) -> u64 {
        self.segments.iter().map(|s| s.tokens).sum()
    }
}

impl InferenceContext for ScopedContext {
    fn scope(&self) -> &ScopeTag {
        &self.scope
    }

    fn branch_index(&self) -> Option<usize> {
        self.branch_index
    }

    fn fork_child(&self, index: usize) -> Self {
        Self {
            scope: self.scope.clone(),
            segments: self.segments.clone(),
            branch_index: Some(index),
        }
    }
}
