//! k-of-n consensus requirement
//!
//! Accepts a value only when at least `k` surviving branches agree on it.

use crate::filter::{group_by, mean_confidence, ConfidenceFilter};
use crate::strategy::{
    record_merge, to_json, Conflict, MergeError, MergeResult, MergeStrategy, Provenance,
    RejectedValue,
};
use concord_owned::{clamp_unit, Owned};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Value equality predicate
pub type ConsensusEqualityFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Behavior when fewer than `k` branches agree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OnFailure {
    /// Return the largest group's value with confidence 0
    #[default]
    LowConfidence,

    /// Fail the merge
    Error,
}

/// Deserializable options for [`RequireConsensus`]
///
/// `k` is kept as a raw number so configuration files can be validated
/// with a precise message instead of a generic parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsensusOptions {
    /// Required number of agreeing branches
    pub k: f64,

    /// Numeric tolerance for the default equality
    #[serde(default)]
    pub tolerance: f64,

    /// Failure behavior
    #[serde(default)]
    pub on_failure: OnFailure,

    /// Branches below this confidence are rejected
    #[serde(default)]
    pub min_confidence: f64,
}

impl ConsensusOptions {
    /// Validate `k` as a positive integer
    ///
    /// # Errors
    /// Returns [`MergeError::InvalidK`] for non-finite, fractional, zero or
    /// negative values
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn required_count(&self) -> Result<usize, MergeError> {
        let k = self.k;
        if !k.is_finite() || k.fract() != 0.0 || k < 1.0 || k > usize::MAX as f64 {
            return Err(MergeError::InvalidK(k));
        }
        Ok(k as usize)
    }
}

/// k-of-n consensus
///
/// # Characteristics
/// - Groups surviving results by equality against each group's first member
/// - Default equality: numbers within `tolerance`, otherwise `PartialEq`
/// - Largest group wins; earlier groups win ties
/// - `consensus = largest group / surviving results`, reported on pass and fail
/// - On pass, `confidence` = mean confidence of the winning group
pub struct RequireConsensus<T> {
    k: usize,
    tolerance: f64,
    on_failure: OnFailure,
    min_confidence: f64,
    equality: Option<ConsensusEqualityFn<T>>,
}

impl<T> std::fmt::Debug for RequireConsensus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequireConsensus")
            .field("k", &self.k)
            .field("tolerance", &self.tolerance)
            .field("on_failure", &self.on_failure)
            .field("min_confidence", &self.min_confidence)
            .field("custom_equality", &self.equality.is_some())
            .finish()
    }
}

impl<T> Clone for RequireConsensus<T> {
    fn clone(&self) -> Self {
        Self {
            k: self.k,
            tolerance: self.tolerance,
            on_failure: self.on_failure,
            min_confidence: self.min_confidence,
            equality: self.equality.clone(),
        }
    }
}

/// Require `k` agreeing branches
///
/// `k == 0` is reported as [`MergeError::InvalidK`] when merging.
#[inline]
#[must_use]
pub fn require_consensus<T>(k: usize) -> RequireConsensus<T> {
    RequireConsensus::new(k)
}

impl<T> RequireConsensus<T> {
    /// Name used in logs and registry
    pub const NAME: &'static str = "consensus.require";

    /// Create new consensus requirement
    #[inline]
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            tolerance: 0.0,
            on_failure: OnFailure::LowConfidence,
            min_confidence: 0.0,
            equality: None,
        }
    }

    /// Build from deserialized options
    ///
    /// # Errors
    /// Returns [`MergeError::InvalidK`] if `k` is not a positive integer
    pub fn from_options(options: ConsensusOptions) -> Result<Self, MergeError> {
        Ok(Self {
            k: options.required_count()?,
            tolerance: options.tolerance,
            on_failure: options.on_failure,
            min_confidence: options.min_confidence,
            equality: None,
        })
    }

    /// Numeric tolerance for the default equality
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Failure behavior
    #[inline]
    #[must_use]
    pub fn on_failure(mut self, on_failure: OnFailure) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Replace the default equality
    #[must_use]
    pub fn with_equality(mut self, eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equality = Some(Arc::new(eq));
        self
    }

    /// Required agreement
    #[inline]
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }
}

impl<T> RequireConsensus<T>
where
    T: PartialEq + serde::Serialize,
{
    /// Default equality: numeric tolerance, otherwise `PartialEq`
    fn default_equal(&self, a: &T, b: &T) -> bool {
        if let (Ok(serde_json::Value::Number(x)), Ok(serde_json::Value::Number(y))) =
            (serde_json::to_value(a), serde_json::to_value(b))
        {
            if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
                return (x - y).abs() <= self.tolerance;
            }
        }
        a == b
    }

    fn equal(&self, a: &T, b: &T) -> bool {
        match &self.equality {
            Some(eq) => eq(a, b),
            None => self.default_equal(a, b),
        }
    }
}

impl<T> MergeStrategy<T> for RequireConsensus<T>
where
    T: Clone + PartialEq + serde::Serialize,
{
    type Output = T;

    fn name(&self) -> &str {
        Self::NAME
    }

    #[allow(clippy::cast_precision_loss)]
    fn merge(&self, results: &[Owned<T>]) -> Result<MergeResult<T>, MergeError> {
        if results.is_empty() {
            return Err(MergeError::EmptyResults);
        }
        if self.k == 0 {
            return Err(MergeError::InvalidK(0.0));
        }
        if self.k > results.len() {
            return Err(MergeError::ConsensusImpossible {
                k: self.k,
                available: results.len(),
            });
        }

        let filtered = ConfidenceFilter::new(self.min_confidence).apply(results)?;
        let groups = group_by(
            filtered
                .kept
                .iter()
                .map(|(i, r)| (*i, r.value(), r.confidence())),
            |a, b| self.equal(a, b),
        );

        let mut largest = 0;
        for (i, group) in groups.iter().enumerate().skip(1) {
            if group.size() > groups[largest].size() {
                largest = i;
            }
        }
        let winner = &groups[largest];
        let consensus = winner.size() as f64 / results.len() as f64;
        let passed = winner.size() >= self.k;

        if !passed && self.on_failure == OnFailure::Error {
            return Err(MergeError::ConsensusNotMet {
                k: self.k,
                max_agreement: winner.size(),
            });
        }

        let mut rejected_values = filtered.rejected.clone();
        for (index, result) in &filtered.kept {
            if !winner.members.contains(index) {
                rejected_values.push(RejectedValue {
                    branch: *index,
                    value: to_json(result.value())?,
                    reason: "did not match consensus value".to_string(),
                });
            }
        }

        let mut conflicts = Vec::new();
        if groups.len() > 1 {
            let values = groups
                .iter()
                .map(|g| to_json(g.representative))
                .collect::<Result<Vec<_>, _>>()?;
            conflicts.push(Conflict::new(values, "consensus"));
        }

        let confidence = if passed {
            mean_confidence(
                filtered
                    .kept
                    .iter()
                    .filter(|(i, _)| winner.members.contains(i))
                    .map(|(_, r)| *r),
            )
        } else {
            tracing::warn!(
                k = self.k,
                max_agreement = winner.size(),
                "consensus requirement not met, returning zero confidence"
            );
            0.0
        };

        let result = MergeResult {
            value: Owned::merged(winner.representative.clone(), confidence),
            provenance: Provenance {
                contributing_branches: winner.members.clone(),
                rejected_values,
                consensus_level: clamp_unit(consensus),
            },
            conflicts,
            stats: None,
        };
        record_merge(Self::NAME, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned<T>(value: T, confidence: f64) -> Owned<T> {
        Owned::new(value, confidence, "test").unwrap()
    }

    #[test]
    fn two_of_three_agree() {
        let results = vec![owned("yes", 0.9), owned("no", 0.8), owned("yes", 0.7)];
        let merged = require_consensus::<&str>(2).merge(&results).unwrap();

        assert_eq!(*merged.value(), "yes");
        assert!((merged.confidence() - 0.8).abs() < 1e-9);
        assert!((merged.consensus_level() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 2]);
        assert_eq!(merged.provenance.rejected_values.len(), 1);
        assert_eq!(merged.provenance.rejected_values[0].branch, 1);
        assert_eq!(
            merged.provenance.rejected_values[0].reason,
            "did not match consensus value"
        );
        assert_eq!(merged.conflicts.len(), 1);
    }

    #[test]
    fn consensus_level_counts_filtered_branches() {
        let results = vec![owned(1, 0.9), owned(1, 0.9), owned(2, 0.1), owned(3, 0.1)];
        let merged = require_consensus::<i32>(2)
            .with_min_confidence(0.5)
            .merge(&results)
            .unwrap();

        assert_eq!(*merged.value(), 1);
        assert!((merged.consensus_level() - 0.5).abs() < 1e-9);
        assert!((merged.confidence() - 0.9).abs() < 1e-9);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1]);
        let rejected: Vec<usize> = merged.provenance.rejected_values.iter().map(|r| r.branch).collect();
        assert_eq!(rejected, vec![2, 3]);
    }

    #[test]
    fn k_larger_than_results_is_impossible() {
        let results = vec![owned(1, 0.9), owned(1, 0.9)];
        let err = require_consensus::<i32>(3).merge(&results).unwrap_err();
        assert!(matches!(err, MergeError::ConsensusImpossible { k: 3, available: 2 }));
        assert!(err.to_string().starts_with("Consensus requirement impossible"));
    }

    #[test]
    fn invalid_k_values() {
        for k in [0.0, -1.0, 1.5] {
            let options = ConsensusOptions {
                k,
                tolerance: 0.0,
                on_failure: OnFailure::LowConfidence,
                min_confidence: 0.0,
            };
            let err = RequireConsensus::<i32>::from_options(options).unwrap_err();
            assert!(err.to_string().contains("k must be a positive integer"), "k = {k}");
        }

        let err = require_consensus::<i32>(0).merge(&[owned(1, 0.5)]).unwrap_err();
        assert!(matches!(err, MergeError::InvalidK(_)));
    }

    #[test]
    fn unmet_requirement_low_confidence() {
        let results = vec![owned(1, 0.9), owned(2, 0.8), owned(3, 0.7)];
        let merged = require_consensus::<i32>(2).merge(&results).unwrap();
        assert_eq!(*merged.value(), 1);
        assert_eq!(merged.confidence(), 0.0);
        assert!((merged.consensus_level() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn unmet_requirement_error() {
        let results = vec![owned(1, 0.9), owned(2, 0.8), owned(3, 0.7)];
        let err = require_consensus::<i32>(2)
            .on_failure(OnFailure::Error)
            .merge(&results)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Consensus requirement not met: needed 2 agreeing branches, got max 1"
        );
    }

    #[test]
    fn numeric_tolerance_groups_close_values() {
        let results = vec![owned(10.0, 0.9), owned(10.04, 0.8), owned(12.0, 0.7)];
        let strict = require_consensus::<f64>(2).merge(&results).unwrap();
        assert_eq!(strict.confidence(), 0.0);

        let tolerant = require_consensus::<f64>(2)
            .with_tolerance(0.05)
            .merge(&results)
            .unwrap();
        assert_eq!(*tolerant.value(), 10.0);
        assert_eq!(tolerant.provenance.contributing_branches, vec![0, 1]);
    }

    #[test]
    fn custom_equality() {
        let results = vec![owned("YES".to_string(), 0.9), owned("yes".to_string(), 0.8)];
        let merged = require_consensus::<String>(2)
            .with_equality(|a, b| a.eq_ignore_ascii_case(b))
            .merge(&results)
            .unwrap();
        assert_eq!(merged.value(), "YES");
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn options_from_toml() {
        let options: ConsensusOptions =
            toml::from_str("k = 2\ntolerance = 0.5\non_failure = \"error\"").unwrap();
        let strategy = RequireConsensus::<f64>::from_options(options).unwrap();
        assert_eq!(strategy.k(), 2);
    }

    #[test]
    fn single_result_with_k_one_is_idempotent() {
        let strategy = require_consensus::<i32>(1);
        let merged = strategy.merge(&[owned(5, 0.45)]).unwrap();
        assert_eq!(*merged.value(), 5);
        assert_eq!(merged.confidence(), 0.45);

        let again = strategy.merge(&[merged.value.clone()]).unwrap();
        assert_eq!(again.value(), merged.value());
        assert_eq!(again.confidence(), merged.confidence());
    }
}
