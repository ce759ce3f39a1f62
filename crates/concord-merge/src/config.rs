//! Configuration-driven strategy construction
//!
//! A [`MergeSpec`] names a built-in strategy and carries its options, so a
//! merge can be reproduced from a TOML or JSON document. Built strategies
//! operate on [`serde_json::Value`] branch outputs.
//!
//! ```
//! use concord_merge::MergeSpec;
//!
//! let spec = MergeSpec::from_toml_str(r#"
//!     strategy = "consensus.require"
//!     k = 2
//!     on_failure = "error"
//! "#).unwrap();
//! assert_eq!(spec.name(), "consensus.require");
//! ```

use crate::array::{Concat, ConcatOptions};
use crate::categorical::{VoteOptions, WeightedVote};
use crate::consensus::{ConsensusOptions, RequireConsensus};
use crate::continuous::{AverageOptions, WeightedAverage};
use crate::object::{FieldwiseMerge, FieldwiseOptions};
use crate::strategy::{json_kind, MergeError, MergeResult, MergeStrategy};
use concord_owned::Owned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boxed strategy over JSON branch outputs
pub type JsonStrategy = Box<dyn MergeStrategy<Value, Output = Value>>;

/// Serializable strategy selection
///
/// `custom.reduce` has no configuration form because its reducer is code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum MergeSpec {
    /// `categorical.weighted_vote`
    #[serde(rename = "categorical.weighted_vote")]
    WeightedVote(VoteOptions),

    /// `continuous.weighted_average`
    #[serde(rename = "continuous.weighted_average")]
    WeightedAverage(AverageOptions),

    /// `object.fieldwise`
    #[serde(rename = "object.fieldwise")]
    Fieldwise(FieldwiseOptions),

    /// `array.concat`
    #[serde(rename = "array.concat")]
    Concat(ConcatOptions),

    /// `consensus.require`
    #[serde(rename = "consensus.require")]
    Consensus(ConsensusOptions),
}

impl MergeSpec {
    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`MergeError::Config`] on unknown strategies or options
    pub fn from_toml_str(s: &str) -> Result<Self, MergeError> {
        toml::from_str(s).map_err(|e| MergeError::Config(e.to_string()))
    }

    /// Parse from JSON
    ///
    /// # Errors
    /// Returns [`MergeError::Config`] on unknown strategies or options
    pub fn from_json_str(s: &str) -> Result<Self, MergeError> {
        serde_json::from_str(s).map_err(|e| MergeError::Config(e.to_string()))
    }

    /// Registry name of the selected strategy
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WeightedVote(_) => WeightedVote::NAME,
            Self::WeightedAverage(_) => WeightedAverage::NAME,
            Self::Fieldwise(_) => FieldwiseMerge::<()>::NAME,
            Self::Concat(_) => Concat::<()>::NAME,
            Self::Consensus(_) => RequireConsensus::<()>::NAME,
        }
    }

    /// Build the strategy
    ///
    /// # Errors
    /// Returns [`MergeError::InvalidK`] for an invalid consensus `k`
    pub fn build(&self) -> Result<JsonStrategy, MergeError> {
        let strategy: JsonStrategy = match *self {
            Self::WeightedVote(options) => Box::new(WeightedVote::new(options)),
            Self::WeightedAverage(options) => Box::new(JsonAverage(WeightedAverage::new(options))),
            Self::Fieldwise(options) => Box::new(FieldwiseMerge::<Value>::new(options)),
            Self::Concat(options) => Box::new(JsonConcat(Concat::new(options))),
            Self::Consensus(options) => Box::new(RequireConsensus::<Value>::from_options(options)?),
        };
        tracing::debug!(strategy = self.name(), "built merge strategy from configuration");
        Ok(strategy)
    }
}

/// [`WeightedAverage`] over JSON numbers
#[derive(Debug, Clone, Copy)]
struct JsonAverage(WeightedAverage);

impl MergeStrategy<Value> for JsonAverage {
    type Output = Value;

    fn name(&self) -> &str {
        WeightedAverage::NAME
    }

    fn merge(&self, results: &[Owned<Value>]) -> Result<MergeResult<Value>, MergeError> {
        let numbers = results
            .iter()
            .enumerate()
            .map(|(branch, r)| match r.value().as_f64() {
                Some(n) => Ok(r.clone().map(|_| n)),
                None => Err(MergeError::UnexpectedShape {
                    branch,
                    expected: "number",
                    found: json_kind(r.value()),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let merged = self.0.merge(&numbers)?;
        Ok(merged.map_value(|n| serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)))
    }
}

/// [`Concat`] over JSON arrays
#[derive(Debug, Clone)]
struct JsonConcat(Concat<Value>);

impl MergeStrategy<Value> for JsonConcat {
    type Output = Value;

    fn name(&self) -> &str {
        Concat::<Value>::NAME
    }

    fn merge(&self, results: &[Owned<Value>]) -> Result<MergeResult<Value>, MergeError> {
        let lists = results
            .iter()
            .enumerate()
            .map(|(branch, r)| match r.value() {
                Value::Array(items) => Ok(r.clone().map(|_| items.clone())),
                other => Err(MergeError::UnexpectedShape {
                    branch,
                    expected: "array",
                    found: json_kind(other),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let merged = self.0.merge(&lists)?;
        Ok(merged.map_value(Value::Array))
    }
}
