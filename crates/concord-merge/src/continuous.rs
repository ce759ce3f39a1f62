//! Continuous merge strategies
//!
//! Confidence-weighted averaging of numeric branch outputs.

use crate::filter::ConfidenceFilter;
use crate::strategy::{
    record_merge, MergeError, MergeResult, MergeStrategy, NumericSummary, Provenance,
    RejectedValue,
};
use concord_owned::{clamp_unit, Owned};
use serde::{Deserialize, Serialize};

/// Minimum number of values before outlier removal applies
pub const MIN_VALUES_FOR_OUTLIERS: usize = 3;

/// Options for [`WeightedAverage`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AverageOptions {
    /// Branches below this confidence are rejected
    pub min_confidence: f64,

    /// Z-score above which a value is dropped; `0` disables removal
    pub outlier_threshold: f64,
}

impl AverageOptions {
    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// With outlier threshold (in standard deviations)
    #[inline]
    #[must_use]
    pub fn with_outlier_threshold(mut self, threshold: f64) -> Self {
        self.outlier_threshold = threshold;
        self
    }
}

/// Confidence-weighted average
///
/// # Characteristics
/// - `value = Σ(v·c) / Σc` over surviving values
/// - dispersion = unweighted population standard deviation
/// - `confidence = mean(c) × (1 − min(cv, 1) × 0.5)`
/// - `consensus = 1 − min(cv, 1)`
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedAverage {
    options: AverageOptions,
}

/// Create a weighted average strategy
#[inline]
#[must_use]
pub fn weighted_average(options: AverageOptions) -> WeightedAverage {
    WeightedAverage::new(options)
}

impl WeightedAverage {
    /// Name used in logs and registry
    pub const NAME: &'static str = "continuous.weighted_average";

    /// Create new average strategy
    #[inline]
    #[must_use]
    pub fn new(options: AverageOptions) -> Self {
        Self { options }
    }

    /// Options of this instance
    #[inline]
    #[must_use]
    pub fn options(&self) -> &AverageOptions {
        &self.options
    }
}

/// Unweighted mean and population standard deviation
///
/// `values` must be non-empty.
fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

impl MergeStrategy<f64> for WeightedAverage {
    type Output = f64;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[Owned<f64>]) -> Result<MergeResult<f64>, MergeError> {
        let filtered = ConfidenceFilter::new(self.options.min_confidence).apply(results)?;
        let mut rejected_values = filtered.rejected.clone();
        let mut survivors = filtered.kept.clone();
        let mut outliers_removed = 0;

        let threshold = self.options.outlier_threshold;
        if threshold > 0.0 && survivors.len() >= MIN_VALUES_FOR_OUTLIERS {
            let values: Vec<f64> = survivors.iter().map(|(_, r)| *r.value()).collect();
            let (mean, stddev) = mean_and_stddev(&values);

            if stddev > 0.0 {
                let (inliers, outliers): (Vec<_>, Vec<_>) = survivors
                    .into_iter()
                    .partition(|(_, r)| (r.value() - mean).abs() / stddev <= threshold);

                for (branch, result) in &outliers {
                    tracing::debug!(branch, value = result.value(), mean, stddev, "outlier removed");
                    rejected_values.push(RejectedValue {
                        branch: *branch,
                        value: serde_json::json!(result.value()),
                        reason: "outlier detected".to_string(),
                    });
                }
                outliers_removed = outliers.len();
                survivors = inliers;
            }

            if survivors.is_empty() {
                return Err(MergeError::AllOutliers { threshold });
            }
        }

        let weight: f64 = survivors.iter().map(|(_, r)| r.confidence()).sum();
        let values: Vec<f64> = survivors.iter().map(|(_, r)| *r.value()).collect();
        let unanimous = values.iter().all(|v| *v == values[0]);
        let (plain_mean, dispersion) = if unanimous {
            (values[0], 0.0)
        } else {
            mean_and_stddev(&values)
        };

        let weighted_mean = if unanimous {
            values[0]
        } else if weight > 0.0 {
            survivors
                .iter()
                .map(|(_, r)| r.value() * r.confidence())
                .sum::<f64>()
                / weight
        } else {
            plain_mean
        };

        let avg_confidence = weight / survivors.len() as f64;
        let cv = if weighted_mean == 0.0 {
            0.0
        } else {
            dispersion / weighted_mean.abs()
        };
        let spread = cv.min(1.0);

        let result = MergeResult {
            value: Owned::merged(weighted_mean, avg_confidence * (1.0 - spread * 0.5)),
            provenance: Provenance {
                contributing_branches: survivors.iter().map(|(i, _)| *i).collect(),
                rejected_values,
                consensus_level: clamp_unit(1.0 - spread),
            },
            conflicts: Vec::new(),
            stats: Some(NumericSummary {
                weighted_mean,
                dispersion,
                outliers_removed,
            }),
        };
        record_merge(Self::NAME, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owned(value: f64, confidence: f64) -> Owned<f64> {
        Owned::new(value, confidence, "test").unwrap()
    }

    #[test]
    fn weighted_average_of_three_estimates() {
        let results = vec![owned(42.5, 0.9), owned(38.2, 0.7), owned(40.1, 0.8)];
        let merged = weighted_average(AverageOptions::default()).merge(&results).unwrap();

        let expected = (42.5 * 0.9 + 38.2 * 0.7 + 40.1 * 0.8) / 2.4;
        assert!((merged.value() - expected).abs() < 1e-9);

        let (_, stddev) = mean_and_stddev(&[42.5, 38.2, 40.1]);
        let stats = merged.stats.unwrap();
        assert!((stats.dispersion - stddev).abs() < 1e-9);
        assert_eq!(stats.outliers_removed, 0);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1, 2]);

        let cv = stddev / expected;
        assert!((merged.confidence() - 0.8 * (1.0 - cv * 0.5)).abs() < 1e-9);
        assert!((merged.consensus_level() - (1.0 - cv)).abs() < 1e-9);
    }

    #[test]
    fn outlier_is_dropped_and_recorded() {
        let results = vec![
            owned(10.0, 0.8),
            owned(10.5, 0.8),
            owned(9.8, 0.8),
            owned(10.2, 0.8),
            owned(50.0, 0.8),
        ];
        let strategy = weighted_average(AverageOptions::default().with_outlier_threshold(1.5));
        let merged = strategy.merge(&results).unwrap();

        assert_eq!(merged.provenance.contributing_branches, vec![0, 1, 2, 3]);
        assert_eq!(merged.provenance.rejected_values.len(), 1);
        assert_eq!(merged.provenance.rejected_values[0].branch, 4);
        assert_eq!(merged.provenance.rejected_values[0].reason, "outlier detected");
        assert!((merged.value() - 10.125).abs() < 1e-9);
        assert_eq!(merged.stats.unwrap().outliers_removed, 1);
    }

    #[test]
    fn outlier_removal_needs_three_values() {
        let results = vec![owned(1.0, 0.5), owned(100.0, 0.5)];
        let strategy = weighted_average(AverageOptions::default().with_outlier_threshold(0.1));
        let merged = strategy.merge(&results).unwrap();
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1]);
    }

    #[test]
    fn tiny_threshold_rejecting_everything_errors() {
        let results = vec![owned(1.0, 0.5), owned(2.0, 0.5), owned(3.0, 0.5), owned(4.0, 0.5)];
        let strategy = weighted_average(AverageOptions::default().with_outlier_threshold(0.1));
        let err = strategy.merge(&results).unwrap_err();
        assert!(matches!(err, MergeError::AllOutliers { .. }));
        assert!(err.to_string().starts_with("All results rejected"));
    }

    #[test]
    fn zero_mean_has_zero_cv() {
        let results = vec![owned(-1.0, 0.6), owned(1.0, 0.6)];
        let merged = weighted_average(AverageOptions::default()).merge(&results).unwrap();
        assert_eq!(*merged.value(), 0.0);
        assert_eq!(merged.consensus_level(), 1.0);
        assert!((merged.confidence() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn single_value_is_idempotent() {
        let results = vec![owned(7.5, 0.35)];
        let strategy = weighted_average(AverageOptions::default());
        let merged = strategy.merge(&results).unwrap();
        assert_eq!(*merged.value(), 7.5);
        assert!((merged.confidence() - 0.35).abs() < 1e-12);

        let again = strategy.merge(&[merged.value.clone()]).unwrap();
        assert_eq!(again.value(), merged.value());
        assert_eq!(again.confidence(), merged.confidence());
    }

    proptest! {
        #[test]
        fn prop_confidence_and_consensus_in_unit(
            entries in proptest::collection::vec((-1.0e6..1.0e6f64, 0.0..=1.0f64), 1..12),
            threshold in 0.0..4.0f64,
        ) {
            let results: Vec<Owned<f64>> = entries
                .iter()
                .map(|(v, c)| Owned::new(*v, *c, "prop").unwrap())
                .collect();
            let strategy = weighted_average(AverageOptions::default().with_outlier_threshold(threshold));
            if let Ok(merged) = strategy.merge(&results) {
                prop_assert!((0.0..=1.0).contains(&merged.confidence()));
                prop_assert!((0.0..=1.0).contains(&merged.consensus_level()));
            }
        }
    }
}
