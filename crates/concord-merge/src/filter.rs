//! Shared confidence filtering and value grouping
//!
//! Every strategy starts from the same two steps: reject branches whose
//! confidence is below `min_confidence`, then (for categorical strategies)
//! group the survivors by equality while keeping their original indices.

use crate::strategy::{to_json, MergeError, RejectedValue};
use concord_owned::Owned;
use serde::Serialize;

/// Survivors of the confidence filter
#[derive(Debug)]
pub(crate) struct Filtered<'a, T> {
    /// `(original index, result)` in input order
    pub(crate) kept: Vec<(usize, &'a Owned<T>)>,

    /// Branches below the threshold
    pub(crate) rejected: Vec<RejectedValue>,
}

impl<'a, T> Filtered<'a, T> {
    /// Original indices of the survivors
    pub(crate) fn indices(&self) -> Vec<usize> {
        self.kept.iter().map(|(i, _)| *i).collect()
    }

    /// Mean confidence of the survivors
    pub(crate) fn mean_confidence(&self) -> f64 {
        mean_confidence(self.kept.iter().map(|(_, r)| *r))
    }
}

/// Minimum-confidence filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ConfidenceFilter {
    min_confidence: f64,
}

impl ConfidenceFilter {
    pub(crate) fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    /// Apply the filter
    ///
    /// # Errors
    /// - [`MergeError::EmptyResults`] if `results` is empty
    /// - [`MergeError::AllBelowThreshold`] if nothing survives
    pub(crate) fn apply<'a, T: Serialize>(
        &self,
        results: &'a [Owned<T>],
    ) -> Result<Filtered<'a, T>, MergeError> {
        if results.is_empty() {
            return Err(MergeError::EmptyResults);
        }

        let mut kept = Vec::with_capacity(results.len());
        let mut rejected = Vec::new();

        for (index, result) in results.iter().enumerate() {
            if result.confidence() < self.min_confidence {
                rejected.push(RejectedValue {
                    branch: index,
                    value: to_json(result.value())?,
                    reason: format!(
                        "confidence below threshold ({} < {})",
                        result.confidence(),
                        self.min_confidence
                    ),
                });
            } else {
                kept.push((index, result));
            }
        }

        if kept.is_empty() {
            return Err(MergeError::AllBelowThreshold {
                min_confidence: self.min_confidence,
            });
        }

        Ok(Filtered { kept, rejected })
    }
}

/// A set of equal values, in formation order
#[derive(Debug)]
pub(crate) struct Group<'a, T> {
    /// First member's value
    pub(crate) representative: &'a T,

    /// Original indices of members
    pub(crate) members: Vec<usize>,

    /// Sum of member confidences
    pub(crate) weight: f64,

    /// Highest single member confidence
    pub(crate) max_confidence: f64,
}

impl<'a, T> Group<'a, T> {
    fn new(index: usize, value: &'a T, confidence: f64) -> Self {
        Self {
            representative: value,
            members: vec![index],
            weight: confidence,
            max_confidence: confidence,
        }
    }

    fn push(&mut self, index: usize, confidence: f64) {
        self.members.push(index);
        self.weight += confidence;
        self.max_confidence = self.max_confidence.max(confidence);
    }

    /// Number of members
    pub(crate) fn size(&self) -> usize {
        self.members.len()
    }
}

/// Group `(index, value, confidence)` triples by `eq` against each
/// group's first member
///
/// Groups appear in the order they were first formed.
pub(crate) fn group_by<'a, T, I, F>(items: I, eq: F) -> Vec<Group<'a, T>>
where
    T: 'a,
    I: IntoIterator<Item = (usize, &'a T, f64)>,
    F: Fn(&T, &T) -> bool,
{
    let mut groups: Vec<Group<'a, T>> = Vec::new();
    for (index, value, confidence) in items {
        match groups.iter_mut().find(|g| eq(g.representative, value)) {
            Some(group) => group.push(index, confidence),
            None => groups.push(Group::new(index, value, confidence)),
        }
    }
    groups
}

/// Mean confidence, 0 for an empty iterator
pub(crate) fn mean_confidence<'a, T: 'a>(results: impl Iterator<Item = &'a Owned<T>>) -> f64 {
    let (sum, count) = results.fold((0.0, 0_usize), |(s, n), r| (s + r.confidence(), n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}
