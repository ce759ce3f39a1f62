//! Fork configuration
//!
//! Policy knobs of a fork as plain serde types, so they can be kept in a
//! configuration file next to the merge strategy.
//!
//! ```toml
//! strategy = "cache-optimized"
//! warmup = "first-branch"
//! on_schema_conflict = "error"
//! ```

use crate::error::ForkError;
use crate::fork::{ForkBranch, ForkOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How branches are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForkStrategy {
    /// Launch everything at once, no cache bookkeeping
    FastParallel,

    /// Warm the shared cache first, then fan out
    #[default]
    CacheOptimized,
}

impl ForkStrategy {
    /// Configuration name
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FastParallel => "fast-parallel",
            Self::CacheOptimized => "cache-optimized",
        }
    }
}

/// How the cache is warmed under [`ForkStrategy::CacheOptimized`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupMode {
    /// Call the warmup coordinator once before any branch starts
    #[default]
    Explicit,

    /// Run branch 0 to completion, then the rest concurrently
    FirstBranch,

    /// No warmup
    None,
}

/// What to do when branches declare different output shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaConflictPolicy {
    /// Log and record a warning, then run
    #[default]
    Warn,

    /// Refuse to run any branch
    Error,

    /// Skip detection
    Allow,
}

/// Serializable fork policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForkConfig {
    /// Scheduling strategy
    pub strategy: ForkStrategy,

    /// Warmup mode
    pub warmup: WarmupMode,

    /// Schema conflict policy
    pub on_schema_conflict: SchemaConflictPolicy,
}

impl ForkConfig {
    /// Parse from TOML
    ///
    /// # Errors
    /// Returns [`ForkError::Config`] on unknown keys or values
    pub fn from_toml_str(s: &str) -> Result<Self, ForkError> {
        toml::from_str(s).map_err(|e| ForkError::Config(e.to_string()))
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns [`ForkError::Config`] if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ForkError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ForkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Apply this policy to a set of branches
    #[must_use]
    pub fn into_options<C, T>(self, branches: Vec<ForkBranch<C, T>>) -> ForkOptions<C, T> {
        ForkOptions::new(self.strategy)
            .with_warmup(self.warmup)
            .on_schema_conflict(self.on_schema_conflict)
            .with_branches(branches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = ForkConfig::default();
        assert_eq!(config.strategy, ForkStrategy::CacheOptimized);
        assert_eq!(config.warmup, WarmupMode::Explicit);
        assert_eq!(config.on_schema_conflict, SchemaConflictPolicy::Warn);
    }

    #[test]
    fn parse_kebab_case() {
        let config = ForkConfig::from_toml_str(
            r#"
            strategy = "fast-parallel"
            warmup = "first-branch"
            on_schema_conflict = "allow"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            ForkConfig {
                strategy: ForkStrategy::FastParallel,
                warmup: WarmupMode::FirstBranch,
                on_schema_conflict: SchemaConflictPolicy::Allow,
            }
        );
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config = ForkConfig::from_toml_str("warmup = \"none\"").unwrap();
        assert_eq!(config.strategy, ForkStrategy::CacheOptimized);
        assert_eq!(config.warmup, WarmupMode::None);
    }

    #[test]
    fn unknown_value_is_config_error() {
        let err = ForkConfig::from_toml_str("strategy = \"turbo\"").unwrap_err();
        assert!(matches!(err, ForkError::Config(_)));
        assert!(err.is_configuration());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fork.toml");
        std::fs::write(&path, "on_schema_conflict = \"error\"\n").unwrap();

        let config = ForkConfig::from_file(&path).unwrap();
        assert_eq!(config.on_schema_conflict, SchemaConflictPolicy::Error);

        let missing = ForkConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(missing.to_string().contains("missing.toml"));
    }
}
