//! Categorical merge strategies
//!
//! Confidence-weighted voting over discrete values.

use crate::filter::{group_by, ConfidenceFilter, Group};
use crate::strategy::{record_merge, to_json, Conflict, MergeError, MergeResult, MergeStrategy, Provenance};
use concord_owned::Owned;
use serde::{Deserialize, Serialize};

/// Tie-break rule between groups of equal weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tiebreaker {
    /// Tied group whose single strongest member is most confident
    #[default]
    HighestConfidence,

    /// Earliest-formed tied group
    First,
}

/// Options for [`WeightedVote`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VoteOptions {
    /// Branches below this confidence are rejected
    pub min_confidence: f64,

    /// Tie-break rule
    pub tiebreaker: Tiebreaker,
}

impl Default for VoteOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            tiebreaker: Tiebreaker::HighestConfidence,
        }
    }
}

impl VoteOptions {
    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// With tie-break rule
    #[inline]
    #[must_use]
    pub fn with_tiebreaker(mut self, tiebreaker: Tiebreaker) -> Self {
        self.tiebreaker = tiebreaker;
        self
    }
}

/// Confidence-weighted vote
///
/// # Characteristics
/// - Groups results by exact value equality
/// - Group weight = sum of member confidences
/// - `confidence = consensus = winner weight / total weight`
/// - A single-branch input is returned with its own confidence
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedVote {
    options: VoteOptions,
}

/// Create a weighted vote strategy
#[inline]
#[must_use]
pub fn weighted_vote(options: VoteOptions) -> WeightedVote {
    WeightedVote::new(options)
}

impl WeightedVote {
    /// Name used in logs and registry
    pub const NAME: &'static str = "categorical.weighted_vote";

    /// Create new vote strategy
    #[inline]
    #[must_use]
    pub fn new(options: VoteOptions) -> Self {
        Self { options }
    }

    /// Options of this instance
    #[inline]
    #[must_use]
    pub fn options(&self) -> &VoteOptions {
        &self.options
    }
}

/// Index of the winning group under `tiebreaker`
///
/// Groups must be non-empty and in formation order.
pub(crate) fn pick_winner<T>(groups: &[Group<'_, T>], tiebreaker: Tiebreaker) -> usize {
    let mut winner = 0;
    for (i, group) in groups.iter().enumerate().skip(1) {
        let best = &groups[winner];
        if group.weight > best.weight {
            winner = i;
        } else if group.weight == best.weight
            && tiebreaker == Tiebreaker::HighestConfidence
            && group.max_confidence > best.max_confidence
        {
            winner = i;
        }
    }
    winner
}

impl<T> MergeStrategy<T> for WeightedVote
where
    T: Clone + PartialEq + Serialize + Send + Sync,
{
    type Output = T;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[Owned<T>]) -> Result<MergeResult<T>, MergeError> {
        let filtered = ConfidenceFilter::new(self.options.min_confidence).apply(results)?;
        let rejected_values = filtered.rejected.clone();

        if let ([_], [(index, only)]) = (results, filtered.kept.as_slice()) {
            let result = MergeResult {
                value: Owned::merged(only.value().clone(), only.confidence()),
                provenance: Provenance {
                    contributing_branches: vec![*index],
                    rejected_values,
                    consensus_level: 1.0,
                },
                conflicts: Vec::new(),
                stats: None,
            };
            record_merge(Self::NAME, &result);
            return Ok(result);
        }

        let groups = group_by(
            filtered
                .kept
                .iter()
                .map(|(i, r)| (*i, r.value(), r.confidence())),
            |a, b| a == b,
        );
        let total_weight: f64 = groups.iter().map(|g| g.weight).sum();
        let winner = &groups[pick_winner(&groups, self.options.tiebreaker)];

        let share = if total_weight > 0.0 {
            winner.weight / total_weight
        } else {
            // All-zero confidences: fall back to headcount share.
            winner.size() as f64 / filtered.kept.len() as f64
        };

        let mut conflicts = Vec::new();
        if groups.len() > 1 {
            let values = groups
                .iter()
                .map(|g| to_json(g.representative))
                .collect::<Result<Vec<_>, _>>()?;
            conflicts.push(Conflict::new(values, "voted"));
        }

        let result = MergeResult {
            value: Owned::merged(winner.representative.clone(), share),
            provenance: Provenance {
                contributing_branches: winner.members.clone(),
                rejected_values,
                consensus_level: concord_owned::clamp_unit(share),
            },
            conflicts,
            stats: None,
        };
        record_merge(Self::NAME, &result);
        Ok(result)
    }
}
