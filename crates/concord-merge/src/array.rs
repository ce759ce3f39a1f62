//! Array merge strategies
//!
//! Concatenation of list-valued branch outputs with optional
//! de-duplication and confidence-ranked truncation.

use crate::filter::ConfidenceFilter;
use crate::strategy::{record_merge, MergeError, MergeResult, MergeStrategy, Provenance};
use concord_owned::{clamp_unit, Owned};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Item equality predicate
pub type EqualityFn<I> = Arc<dyn Fn(&I, &I) -> bool + Send + Sync>;

/// Options for [`Concat`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcatOptions {
    /// Branches below this confidence are rejected
    pub min_confidence: f64,

    /// Drop repeated items, keeping the first occurrence
    pub remove_duplicates: bool,

    /// Keep at most this many items, ranked by source confidence
    pub max_items: Option<usize>,
}

impl Default for ConcatOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            remove_duplicates: true,
            max_items: None,
        }
    }
}

impl ConcatOptions {
    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Keep duplicates
    #[inline]
    #[must_use]
    pub fn keep_duplicates(mut self) -> Self {
        self.remove_duplicates = false;
        self
    }

    /// With item cap
    #[inline]
    #[must_use]
    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }
}

/// Array concatenation
///
/// # Characteristics
/// - Flattens every surviving branch's list in branch order
/// - Default equality is structural (`PartialEq`)
/// - `confidence = mean(c)` of contributing branches
/// - `consensus = (items before dedup − unique items) / items before dedup`
/// - A single-branch input with no duplicates and within `max_items` is
///   returned unchanged with consensus 1
pub struct Concat<I> {
    options: ConcatOptions,
    equality: Option<EqualityFn<I>>,
}

impl<I> std::fmt::Debug for Concat<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Concat")
            .field("options", &self.options)
            .field("custom_equality", &self.equality.is_some())
            .finish()
    }
}

impl<I> Clone for Concat<I> {
    fn clone(&self) -> Self {
        Self {
            options: self.options,
            equality: self.equality.clone(),
        }
    }
}

/// Create a concatenation strategy
#[inline]
#[must_use]
pub fn concat<I>(options: ConcatOptions) -> Concat<I> {
    Concat::new(options)
}

impl<I> Concat<I> {
    /// Name used in logs and registry
    pub const NAME: &'static str = "array.concat";

    /// Create new concatenation strategy
    #[inline]
    #[must_use]
    pub fn new(options: ConcatOptions) -> Self {
        Self {
            options,
            equality: None,
        }
    }

    /// Replace the default structural equality
    #[must_use]
    pub fn with_equality(mut self, eq: impl Fn(&I, &I) -> bool + Send + Sync + 'static) -> Self {
        self.equality = Some(Arc::new(eq));
        self
    }

    /// Options of this instance
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConcatOptions {
        &self.options
    }
}

impl<I> Concat<I>
where
    I: PartialEq,
{
    fn equal(&self, a: &I, b: &I) -> bool {
        match &self.equality {
            Some(eq) => eq(a, b),
            None => a == b,
        }
    }
}

impl<I> MergeStrategy<Vec<I>> for Concat<I>
where
    I: Clone + PartialEq + Serialize,
{
    type Output = Vec<I>;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[Owned<Vec<I>>]) -> Result<MergeResult<Vec<I>>, MergeError> {
        let filtered = ConfidenceFilter::new(self.options.min_confidence).apply(results)?;

        // (item, source confidence) in branch order
        let flattened: Vec<(&I, f64)> = filtered
            .kept
            .iter()
            .flat_map(|(_, r)| r.value().iter().map(move |item| (item, r.confidence())))
            .collect();
        let total_items = flattened.len();

        let mut items: Vec<(&I, f64)> = Vec::with_capacity(total_items);
        if self.options.remove_duplicates {
            for (item, confidence) in flattened {
                if !items.iter().any(|(seen, _)| self.equal(seen, item)) {
                    items.push((item, confidence));
                }
            }
        } else {
            items = flattened;
        }
        let unique_items = items.len();

        if let Some(max) = self.options.max_items {
            if items.len() > max {
                // Stable: equal-confidence items keep branch order.
                items.sort_by(|a, b| b.1.total_cmp(&a.1));
                items.truncate(max);
            }
        }

        let consensus = if results.len() == 1 && items.len() == total_items {
            // Single branch already unique and within the cap.
            1.0
        } else if total_items == 0 {
            0.0
        } else {
            (total_items - unique_items) as f64 / total_items as f64
        };

        let value: Vec<I> = items.into_iter().map(|(item, _)| item.clone()).collect();
        let result = MergeResult {
            value: Owned::merged(value, filtered.mean_confidence()),
            provenance: Provenance {
                contributing_branches: filtered.indices(),
                rejected_values: filtered.rejected.clone(),
                consensus_level: clamp_unit(consensus),
            },
            conflicts: Vec::new(),
            stats: None,
        };
        record_merge(Self::NAME, &result);
        Ok(result)
    }
}
