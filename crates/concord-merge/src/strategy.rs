//! Merge strategy trait and core types
//!
//! Provides the [`MergeStrategy`] trait for reducing the ordered outputs of
//! a fork into one auditable decision.

use concord_owned::Owned;
use serde::Serialize;

/// Merge strategy for a slice of branch results
///
/// # Contract
/// - `results` must be non-empty
/// - indices in the returned [`Provenance`] always refer to positions in
///   the original `results` slice, before any filtering
/// - confidence and consensus level of the output lie in `[0, 1]`
/// - `merge()` is deterministic given the same options and inputs
pub trait MergeStrategy<T>: Send + Sync + std::fmt::Debug {
    /// Type of the merged value
    type Output;

    /// Strategy name (for logs and provenance)
    fn name(&self) -> &str;

    /// Reduce branch results into one value
    ///
    /// # Errors
    /// Returns [`MergeError`] when the input is empty, when every branch is
    /// rejected, or on a strategy-specific configuration violation
    fn merge(&self, results: &[Owned<T>]) -> Result<MergeResult<Self::Output>, MergeError>;
}

/// Output of a merge
#[derive(Debug, Clone, Serialize)]
pub struct MergeResult<U> {
    /// Merged value, scope `"merged"`
    pub value: Owned<U>,

    /// Which branches contributed and which were excluded
    pub provenance: Provenance,

    /// Disagreements observed while merging
    pub conflicts: Vec<Conflict>,

    /// Numeric summary (continuous strategies only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<NumericSummary>,
}

impl<U> MergeResult<U> {
    /// Merged value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &U {
        self.value.value()
    }

    /// Merged confidence
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.value.confidence()
    }

    /// Consensus level
    #[inline]
    #[must_use]
    pub fn consensus_level(&self) -> f64 {
        self.provenance.consensus_level
    }

    /// Check whether any conflict was recorded
    #[inline]
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Convert the merged value, keeping provenance and scores
    #[must_use]
    pub fn map_value<V>(self, f: impl FnOnce(U) -> V) -> MergeResult<V> {
        MergeResult {
            value: self.value.map(f),
            provenance: self.provenance,
            conflicts: self.conflicts,
            stats: self.stats,
        }
    }
}

/// Provenance of a merged value
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Provenance {
    /// Original indices of branches that contributed
    pub contributing_branches: Vec<usize>,

    /// Branches excluded from the result
    pub rejected_values: Vec<RejectedValue>,

    /// Agreement level in `[0, 1]`
    pub consensus_level: f64,
}

/// A branch excluded from the merged value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedValue {
    /// Original branch index
    pub branch: usize,

    /// JSON rendering of the rejected value
    pub value: serde_json::Value,

    /// Human-readable reason
    pub reason: String,
}

/// A disagreement observed during merging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    /// Field name (fieldwise merges only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Distinct competing values, in first-seen order
    pub values: Vec<serde_json::Value>,

    /// How it was resolved
    pub resolution: String,
}

impl Conflict {
    /// Whole-value conflict
    #[inline]
    #[must_use]
    pub fn new(values: Vec<serde_json::Value>, resolution: impl Into<String>) -> Self {
        Self {
            field: None,
            values,
            resolution: resolution.into(),
        }
    }

    /// Per-field conflict
    #[inline]
    #[must_use]
    pub fn for_field(
        field: impl Into<String>,
        values: Vec<serde_json::Value>,
        resolution: impl Into<String>,
    ) -> Self {
        Self {
            field: Some(field.into()),
            values,
            resolution: resolution.into(),
        }
    }
}

/// Summary statistics of a numeric merge
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NumericSummary {
    /// Confidence-weighted mean of surviving values
    pub weighted_mean: f64,

    /// Unweighted population standard deviation of surviving values
    pub dispersion: f64,

    /// Number of values dropped as outliers
    pub outliers_removed: usize,
}

/// Merge error with diagnostics
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// No results supplied
    #[error("Cannot merge empty results array")]
    EmptyResults,

    /// Every branch fell below `min_confidence`
    #[error("All results rejected: confidence below threshold (min_confidence = {min_confidence})")]
    AllBelowThreshold {
        /// Configured threshold
        min_confidence: f64,
    },

    /// Outlier removal emptied the set
    #[error("All results rejected: every value is an outlier (threshold = {threshold})")]
    AllOutliers {
        /// Configured outlier threshold
        threshold: f64,
    },

    /// Object field sets differ and partial merges are not allowed
    #[error("Field mismatch: branch {branch} has fields {found:?}, expected {expected:?}")]
    FieldMismatch {
        /// Original index of the offending branch
        branch: usize,
        /// Reference field set
        expected: Vec<String>,
        /// Offending field set
        found: Vec<String>,
    },

    /// Value is not a JSON object / array / number as required
    #[error("branch {branch}: expected {expected}, got {found}")]
    UnexpectedShape {
        /// Original branch index
        branch: usize,
        /// Required JSON kind
        expected: &'static str,
        /// Observed JSON kind
        found: &'static str,
    },

    /// Caller reducer failed
    #[error("Custom merge function failed: {source}")]
    CustomFailed {
        /// Underlying error
        #[source]
        source: anyhow::Error,
    },

    /// Caller callback produced a value outside `[0, 1]`
    #[error("Custom {callback} callback returned invalid value: {value}")]
    InvalidCallbackValue {
        /// Which callback
        callback: &'static str,
        /// Returned value
        value: f64,
    },

    /// Consensus `k` is not a positive integer
    #[error("k must be a positive integer, got {0}")]
    InvalidK(f64),

    /// Consensus `k` exceeds the number of results
    #[error("Consensus requirement impossible: need {k} agreeing branches but only {available} results")]
    ConsensusImpossible {
        /// Required agreement
        k: usize,
        /// Number of results supplied
        available: usize,
    },

    /// Not enough branches agreed
    #[error("Consensus requirement not met: needed {k} agreeing branches, got max {max_agreement}")]
    ConsensusNotMet {
        /// Required agreement
        k: usize,
        /// Size of the largest agreeing group
        max_agreement: usize,
    },

    /// Strategy name or options could not be parsed
    #[error("invalid merge configuration: {0}")]
    Config(String),

    /// Value could not be converted to/from JSON
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MergeError {
    /// Check if error stems from caller configuration rather than data
    ///
    /// Configuration errors are raised before any value is inspected and
    /// are never worth retrying.
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyResults
                | Self::FieldMismatch { .. }
                | Self::InvalidCallbackValue { .. }
                | Self::InvalidK(_)
                | Self::ConsensusImpossible { .. }
                | Self::Config(_)
        )
    }
}

/// JSON rendering of a branch value for provenance records
pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, MergeError> {
    Ok(serde_json::to_value(value)?)
}

/// Short name of a JSON value's kind
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Log and count a completed merge
pub(crate) fn record_merge<U>(name: &str, result: &MergeResult<U>) {
    metrics::counter!("concord_merge_total", "strategy" => name.to_string()).increment(1);
    tracing::debug!(
        strategy = name,
        confidence = result.confidence(),
        consensus = result.consensus_level(),
        contributing = result.provenance.contributing_branches.len(),
        rejected = result.provenance.rejected_values.len(),
        conflicts = result.conflicts.len(),
        "merge completed"
    );
}
