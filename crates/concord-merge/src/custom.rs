//! Caller-defined reduction
//!
//! Wraps a reducer closure in the shared merge contract: empty-input and
//! confidence filtering, provenance, and range checks on the caller's
//! confidence/consensus callbacks.

use crate::filter::ConfidenceFilter;
use crate::strategy::{record_merge, MergeError, MergeResult, MergeStrategy, Provenance};
use concord_owned::Owned;
use std::sync::Arc;

/// Reducer over surviving results
pub type ReduceFn<T, U> = Arc<dyn Fn(&[Owned<T>]) -> anyhow::Result<U> + Send + Sync>;

/// Score callback over surviving results and the reduced value
pub type ScoreFn<T, U> = Arc<dyn Fn(&[Owned<T>], &U) -> f64 + Send + Sync>;

/// Default consensus level when no callback is supplied
pub const DEFAULT_CUSTOM_CONSENSUS: f64 = 1.0;

/// Custom reduction strategy
///
/// # Defaults
/// - confidence: mean confidence of the surviving inputs
/// - consensus: `default_consensus` (see [`DEFAULT_CUSTOM_CONSENSUS`])
pub struct CustomMerge<T, U> {
    name: String,
    reduce: ReduceFn<T, U>,
    confidence: Option<ScoreFn<T, U>>,
    consensus: Option<ScoreFn<T, U>>,
    default_consensus: f64,
    min_confidence: f64,
}

impl<T, U> std::fmt::Debug for CustomMerge<T, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomMerge")
            .field("name", &self.name)
            .field("confidence_callback", &self.confidence.is_some())
            .field("consensus_callback", &self.consensus.is_some())
            .field("default_consensus", &self.default_consensus)
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl<T, U> Clone for CustomMerge<T, U> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            reduce: Arc::clone(&self.reduce),
            confidence: self.confidence.clone(),
            consensus: self.consensus.clone(),
            default_consensus: self.default_consensus,
            min_confidence: self.min_confidence,
        }
    }
}

/// Create a custom strategy from a reducer
#[must_use]
pub fn custom<T, U>(
    reduce: impl Fn(&[Owned<T>]) -> anyhow::Result<U> + Send + Sync + 'static,
) -> CustomMerge<T, U> {
    CustomMerge::new(reduce)
}

impl<T, U> CustomMerge<T, U> {
    /// Default name used in logs and registry
    pub const NAME: &'static str = "custom.reduce";

    /// Create new custom strategy
    #[must_use]
    pub fn new(
        reduce: impl Fn(&[Owned<T>]) -> anyhow::Result<U> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Self::NAME.to_string(),
            reduce: Arc::new(reduce),
            confidence: None,
            consensus: None,
            default_consensus: DEFAULT_CUSTOM_CONSENSUS,
            min_confidence: 0.0,
        }
    }

    /// Name this strategy instance
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Confidence callback
    #[must_use]
    pub fn with_confidence(
        mut self,
        f: impl Fn(&[Owned<T>], &U) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.confidence = Some(Arc::new(f));
        self
    }

    /// Consensus callback
    #[must_use]
    pub fn with_consensus(
        mut self,
        f: impl Fn(&[Owned<T>], &U) -> f64 + Send + Sync + 'static,
    ) -> Self {
        self.consensus = Some(Arc::new(f));
        self
    }

    /// Consensus level used when no callback is set
    #[inline]
    #[must_use]
    pub fn with_default_consensus(mut self, consensus: f64) -> Self {
        self.default_consensus = consensus;
        self
    }

    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }
}

fn checked(callback: &'static str, value: f64) -> Result<f64, MergeError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(MergeError::InvalidCallbackValue { callback, value })
    }
}

impl<T, U> MergeStrategy<T> for CustomMerge<T, U>
where
    T: Clone + serde::Serialize,
{
    type Output = U;

    fn name(&self) -> &str {
        &self.name
    }

    fn merge(&self, results: &[Owned<T>]) -> Result<MergeResult<U>, MergeError> {
        let filtered = ConfidenceFilter::new(self.min_confidence).apply(results)?;
        let survivors: Vec<Owned<T>> = filtered.kept.iter().map(|(_, r)| (*r).clone()).collect();

        let value = (self.reduce)(&survivors).map_err(|source| {
            tracing::warn!(strategy = %self.name, error = %source, "custom reducer failed");
            MergeError::CustomFailed { source }
        })?;

        let confidence = match &self.confidence {
            Some(f) => checked("confidence", f(&survivors, &value))?,
            None => filtered.mean_confidence(),
        };
        let consensus = match &self.consensus {
            Some(f) => checked("consensus", f(&survivors, &value))?,
            None => checked("default consensus", self.default_consensus)?,
        };

        let result = MergeResult {
            value: Owned::merged(value, confidence),
            provenance: Provenance {
                contributing_branches: filtered.indices(),
                rejected_values: filtered.rejected.clone(),
                consensus_level: consensus,
            },
            conflicts: Vec::new(),
            stats: None,
        };
        record_merge(&self.name, &result);
        Ok(result)
    }
}
