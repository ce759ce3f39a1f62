//! Immutable result envelope
//!
//! Every branch of a fork produces an [`Owned<T>`], and every merge
//! strategy reduces a slice of them into a new one.

use crate::scope::{ScopeTag, TraceId};
use serde::{Deserialize, Serialize};

/// Errors related to envelope construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OwnedError {
    /// Confidence is NaN or outside `[0, 1]`
    #[error("confidence must lie in [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),
}

/// Value + confidence + scope + trace id
///
/// # Invariants
/// - `confidence` is always within `[0, 1]` and never NaN
/// - Immutable after construction (no setters)
/// - `trace_id` is audit-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Owned<T> {
    value: T,
    #[serde(deserialize_with = "deserialize_confidence")]
    confidence: f64,
    scope: ScopeTag,
    trace_id: TraceId,
}

fn deserialize_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let confidence = f64::deserialize(deserializer)?;
    if (0.0..=1.0).contains(&confidence) {
        Ok(confidence)
    } else {
        Err(serde::de::Error::custom(OwnedError::ConfidenceOutOfRange(
            confidence,
        )))
    }
}

impl<T> Owned<T> {
    /// Create a new envelope
    ///
    /// # Errors
    /// Returns [`OwnedError::ConfidenceOutOfRange`] for NaN or values
    /// outside `[0, 1]`
    pub fn new(value: T, confidence: f64, scope: impl Into<ScopeTag>) -> Result<Self, OwnedError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(OwnedError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            value,
            confidence,
            scope: scope.into(),
            trace_id: TraceId::new(),
        })
    }

    /// Create the output envelope of a merge
    ///
    /// Stamps scope `"merged"` and a fresh trace id. Confidence is clamped
    /// into `[0, 1]`; NaN becomes 0.
    #[must_use]
    pub fn merged(value: T, confidence: f64) -> Self {
        Self {
            value,
            confidence: clamp_unit(confidence),
            scope: ScopeTag::merged(),
            trace_id: TraceId::new(),
        }
    }

    /// Borrow the value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Confidence in `[0, 1]`
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Scope tag
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ScopeTag {
        &self.scope
    }

    /// Trace id (audit only)
    #[inline]
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Consume and return the value
    #[inline]
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Consume into `(value, confidence, scope, trace_id)`
    #[inline]
    #[must_use]
    pub fn into_parts(self) -> (T, f64, ScopeTag, TraceId) {
        (self.value, self.confidence, self.scope, self.trace_id)
    }

    /// Transform the value, keeping confidence, scope and trace id
    #[must_use]
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Owned<U> {
        Owned {
            value: f(self.value),
            confidence: self.confidence,
            scope: self.scope,
            trace_id: self.trace_id,
        }
    }

    /// Widen the scope to include `other`
    ///
    /// The value, confidence and trace id are unchanged.
    #[must_use]
    pub fn bridge(self, other: &ScopeTag) -> Owned<T> {
        let scope = self.scope.union(other);
        Owned { scope, ..self }
    }
}

/// Clamp into `[0, 1]`, mapping NaN to 0
#[inline]
#[must_use]
pub fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
