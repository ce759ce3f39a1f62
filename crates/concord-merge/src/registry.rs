//! Strategy registry for merge strategies
//!
//! Provides [`StrategyRegistry`] for listing strategy names.

use crate::array::Concat;
use crate::categorical::WeightedVote;
use crate::consensus::RequireConsensus;
use crate::continuous::WeightedAverage;
use crate::custom::CustomMerge;
use crate::object::FieldwiseMerge;
use std::collections::BTreeSet;

/// Names of the built-in strategies
pub const BUILTIN_STRATEGIES: [&str; 6] = [
    WeightedVote::NAME,
    WeightedAverage::NAME,
    FieldwiseMerge::<()>::NAME,
    Concat::<()>::NAME,
    CustomMerge::<(), ()>::NAME,
    RequireConsensus::<()>::NAME,
];

/// Registry of available merge strategy names
///
/// Strategies are type-parameterized and used directly, so the registry
/// tracks names only. Names iterate in sorted order.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeSet<String>,
}

impl StrategyRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: BTreeSet::new(),
        }
    }

    /// Create registry with built-in strategies
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in BUILTIN_STRATEGIES {
            registry.register(name);
        }
        registry
    }

    /// Register a strategy name
    ///
    /// Returns `false` if the name was already present.
    pub fn register(&mut self, name: &str) -> bool {
        self.strategies.insert(name.to_string())
    }

    /// Check if strategy exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains(name)
    }

    /// Remove strategy
    #[inline]
    pub fn remove(&mut self, name: &str) -> bool {
        self.strategies.remove(name)
    }

    /// List all registered strategy names
    #[inline]
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(String::as_str).collect()
    }

    /// Get number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
