//! Object merge strategies
//!
//! Field-by-field reduction of structured branch outputs. Values are
//! handled through their JSON object form, so any `Serialize +
//! DeserializeOwned` type whose encoding is an object can be merged.

use crate::categorical::{pick_winner, Tiebreaker};
use crate::filter::{group_by, ConfidenceFilter};
use crate::strategy::{
    json_kind, record_merge, to_json, Conflict, MergeError, MergeResult, MergeStrategy,
    Provenance,
};
use concord_owned::{clamp_unit, Owned};
use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;

/// How each field is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldStrategy {
    /// Per-field weighted vote
    #[default]
    Vote,

    /// Whole object from the first surviving branch
    First,

    /// Whole object from the most confident surviving branch
    HighestConfidence,
}

/// Options for [`FieldwiseMerge`]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldwiseOptions {
    /// Branches below this confidence are rejected
    pub min_confidence: f64,

    /// Per-field selection rule
    pub field_strategy: FieldStrategy,

    /// Allow branches with differing field sets
    pub allow_partial: bool,

    /// Tie-break rule for per-field votes
    pub tiebreaker: Tiebreaker,
}

impl FieldwiseOptions {
    /// With minimum confidence
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// With field strategy
    #[inline]
    #[must_use]
    pub fn with_field_strategy(mut self, field_strategy: FieldStrategy) -> Self {
        self.field_strategy = field_strategy;
        self
    }

    /// Allow differing field sets
    #[inline]
    #[must_use]
    pub fn allow_partial(mut self) -> Self {
        self.allow_partial = true;
        self
    }
}

/// Fieldwise object merge
///
/// # Characteristics
/// - Field sets must match unless `allow_partial`
/// - `vote`: each field voted independently, weighted by confidence
/// - `first` / `highest-confidence`: one whole object, no field mixing
/// - Conflicting fields are recorded with resolution `voted` for every rule
/// - `confidence = mean(c) × (1 − conflicted fields / total fields)`
pub struct FieldwiseMerge<T> {
    options: FieldwiseOptions,
    _value: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for FieldwiseMerge<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldwiseMerge")
            .field("options", &self.options)
            .finish()
    }
}

impl<T> Clone for FieldwiseMerge<T> {
    fn clone(&self) -> Self {
        Self::new(self.options)
    }
}

/// Create a fieldwise merge strategy
#[inline]
#[must_use]
pub fn fieldwise<T>(options: FieldwiseOptions) -> FieldwiseMerge<T> {
    FieldwiseMerge::new(options)
}

impl<T> FieldwiseMerge<T> {
    /// Name used in logs and registry
    pub const NAME: &'static str = "object.fieldwise";

    /// Create new fieldwise strategy
    #[inline]
    #[must_use]
    pub fn new(options: FieldwiseOptions) -> Self {
        Self {
            options,
            _value: PhantomData,
        }
    }

    /// Options of this instance
    #[inline]
    #[must_use]
    pub fn options(&self) -> &FieldwiseOptions {
        &self.options
    }
}

/// A surviving branch in object form
struct Branch {
    index: usize,
    confidence: f64,
    fields: Map<String, Value>,
}

fn field_names(map: &Map<String, Value>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

impl<T> MergeStrategy<T> for FieldwiseMerge<T>
where
    T: Serialize + DeserializeOwned,
{
    type Output = T;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[Owned<T>]) -> Result<MergeResult<T>, MergeError> {
        let filtered = ConfidenceFilter::new(self.options.min_confidence).apply(results)?;

        let mut branches = Vec::with_capacity(filtered.kept.len());
        for (index, result) in &filtered.kept {
            match to_json(result.value())? {
                Value::Object(fields) => branches.push(Branch {
                    index: *index,
                    confidence: result.confidence(),
                    fields,
                }),
                other => {
                    return Err(MergeError::UnexpectedShape {
                        branch: *index,
                        expected: "object",
                        found: json_kind(&other),
                    })
                }
            }
        }

        if !self.options.allow_partial {
            let expected = field_names(&branches[0].fields);
            for branch in &branches[1..] {
                let found = field_names(&branch.fields);
                if found != expected {
                    return Err(MergeError::FieldMismatch {
                        branch: branch.index,
                        expected,
                        found,
                    });
                }
            }
        }

        // Union of field names in first-seen order.
        let all_fields: IndexSet<&str> = branches
            .iter()
            .flat_map(|b| b.fields.keys().map(String::as_str))
            .collect();

        let mut conflicts = Vec::new();
        for field in &all_fields {
            let mut distinct: Vec<&Value> = Vec::new();
            for value in branches.iter().filter_map(|b| b.fields.get(*field)) {
                if !distinct.contains(&value) {
                    distinct.push(value);
                }
            }
            if distinct.len() > 1 {
                conflicts.push(Conflict::for_field(
                    *field,
                    distinct.into_iter().cloned().collect(),
                    "voted",
                ));
            }
        }

        let (merged, contributing) = match self.options.field_strategy {
            FieldStrategy::Vote => {
                let mut merged = Map::new();
                for field in &all_fields {
                    let groups = group_by(
                        branches
                            .iter()
                            .filter_map(|b| b.fields.get(*field).map(|v| (b.index, v, b.confidence))),
                        |a, b| a == b,
                    );
                    let winner = &groups[pick_winner(&groups, self.options.tiebreaker)];
                    merged.insert((*field).to_string(), winner.representative.clone());
                }
                (merged, filtered.indices())
            }
            FieldStrategy::First => {
                let first = &branches[0];
                (first.fields.clone(), vec![first.index])
            }
            FieldStrategy::HighestConfidence => {
                let mut best = &branches[0];
                for branch in &branches[1..] {
                    if branch.confidence > best.confidence {
                        best = branch;
                    }
                }
                (best.fields.clone(), vec![best.index])
            }
        };

        let total_fields = all_fields.len();
        let agreement = if total_fields == 0 {
            1.0
        } else {
            1.0 - conflicts.len() as f64 / total_fields as f64
        };
        let confidence = filtered.mean_confidence() * agreement;
        let value: T = serde_json::from_value(Value::Object(merged))?;

        let result = MergeResult {
            value: Owned::merged(value, confidence),
            provenance: Provenance {
                contributing_branches: contributing,
                rejected_values: filtered.rejected.clone(),
                consensus_level: clamp_unit(agreement),
            },
            conflicts,
            stats: None,
        };
        record_merge(Self::NAME, &result);
        Ok(result)
    }
}
