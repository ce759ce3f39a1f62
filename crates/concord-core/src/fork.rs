//! Fork orchestration
//!
//! Runs N branch functions against isolated child contexts and returns
//! their results in declaration order.
//!
//! # Failure semantics
//!
//! The first branch error observed is returned immediately. Siblings that
//! are still running are neither awaited nor cancelled: each branch is a
//! spawned task and keeps running detached until it finishes on its own.
//! Callers needing a deadline wrap the whole call in `tokio::time::timeout`.

use crate::config::{ForkStrategy, SchemaConflictPolicy, WarmupMode};
use crate::context::InferenceContext;
use crate::error::ForkError;
use crate::schema::detect_schema_conflicts;
use crate::warmup::{get_warmup_executor, WarmupCoordinator, WarmupReport};
use concord_merge::{MergeResult, MergeStrategy};
use concord_owned::{Owned, ShapeSignature};
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

/// Boxed future produced by a branch
pub type BranchFuture<T> = BoxFuture<'static, anyhow::Result<Owned<T>>>;

type BranchFn<C, T> = Box<dyn FnOnce(C) -> BranchFuture<T> + Send>;

/// One branch of a fork
///
/// The closure receives the branch's own child context by value.
pub struct ForkBranch<C, T> {
    signature: Option<ShapeSignature>,
    run: BranchFn<C, T>,
}

impl<C, T> std::fmt::Debug for ForkBranch<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkBranch")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl<C, T> ForkBranch<C, T> {
    /// Create new branch from an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(C) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Owned<T>>> + Send + 'static,
    {
        Self {
            signature: None,
            run: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Declare the structural signature of this branch's output
    #[inline]
    #[must_use]
    pub fn with_signature(mut self, signature: ShapeSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Declared output signature
    #[inline]
    #[must_use]
    pub fn signature(&self) -> Option<&ShapeSignature> {
        self.signature.as_ref()
    }
}

/// Options of one fork call
pub struct ForkOptions<C, T> {
    /// Scheduling strategy
    pub strategy: ForkStrategy,

    /// Warmup mode (cache-optimized only)
    pub warmup: WarmupMode,

    /// Schema conflict policy (cache-optimized only)
    pub on_schema_conflict: SchemaConflictPolicy,

    /// Branches in declaration order
    pub branches: Vec<ForkBranch<C, T>>,
}

impl<C, T> std::fmt::Debug for ForkOptions<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkOptions")
            .field("strategy", &self.strategy)
            .field("warmup", &self.warmup)
            .field("on_schema_conflict", &self.on_schema_conflict)
            .field("branches", &self.branches.len())
            .finish()
    }
}

impl<C, T> ForkOptions<C, T> {
    /// Create new options with default warmup and conflict policy
    #[inline]
    #[must_use]
    pub fn new(strategy: ForkStrategy) -> Self {
        Self {
            strategy,
            warmup: WarmupMode::default(),
            on_schema_conflict: SchemaConflictPolicy::default(),
            branches: Vec::new(),
        }
    }

    /// Fast-parallel options
    #[inline]
    #[must_use]
    pub fn fast_parallel() -> Self {
        Self::new(ForkStrategy::FastParallel)
    }

    /// Cache-optimized options
    #[inline]
    #[must_use]
    pub fn cache_optimized() -> Self {
        Self::new(ForkStrategy::CacheOptimized)
    }

    /// With warmup mode
    #[inline]
    #[must_use]
    pub fn with_warmup(mut self, warmup: WarmupMode) -> Self {
        self.warmup = warmup;
        self
    }

    /// With schema conflict policy
    #[inline]
    #[must_use]
    pub fn on_schema_conflict(mut self, policy: SchemaConflictPolicy) -> Self {
        self.on_schema_conflict = policy;
        self
    }

    /// Append a branch
    #[inline]
    #[must_use]
    pub fn branch(mut self, branch: ForkBranch<C, T>) -> Self {
        self.branches.push(branch);
        self
    }

    /// Append branches
    #[must_use]
    pub fn with_branches(mut self, branches: impl IntoIterator<Item = ForkBranch<C, T>>) -> Self {
        self.branches.extend(branches);
        self
    }
}

/// Cache accounting of a fork
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Tokens billed for warmup
    pub warmup_cost: u64,

    /// Cached tokens available to each branch, in declaration order
    pub branch_cache_hits: Vec<u64>,

    /// Sum of `branch_cache_hits`
    pub total_saved: u64,
}

impl CacheStats {
    /// All-zero stats for `branches` branches
    #[must_use]
    pub fn zeroed(branches: usize) -> Self {
        Self {
            warmup_cost: 0,
            branch_cache_hits: vec![0; branches],
            total_saved: 0,
        }
    }

    /// Stats after a successful explicit warmup
    ///
    /// Every branch is credited with the tokens the warmup cached.
    #[must_use]
    pub fn from_warmup(report: &WarmupReport, branches: usize) -> Self {
        let branch_cache_hits = vec![report.cache_created_tokens; branches];
        Self {
            warmup_cost: report.token_cost,
            total_saved: branch_cache_hits.iter().sum(),
            branch_cache_hits,
        }
    }

    /// Check whether nothing was cached or billed
    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.warmup_cost == 0 && self.total_saved == 0 && self.branch_cache_hits.iter().all(|h| *h == 0)
    }
}

/// Output of a fork
#[derive(Debug, Clone, Serialize)]
pub struct ForkResult<T> {
    /// Branch results in declaration order
    pub results: Vec<Owned<T>>,

    /// Cache accounting
    pub cache_stats: CacheStats,

    /// Soft-degradation and schema warnings
    pub warnings: Vec<String>,
}

impl<T> ForkResult<T> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            cache_stats: CacheStats::default(),
            warnings: Vec::new(),
        }
    }
}

/// Output of [`ForkOrchestrator::fork_and_merge`]
#[derive(Debug, Clone, Serialize)]
pub struct ForkMergeOutcome<U> {
    /// Merged value with provenance
    pub merge: MergeResult<U>,

    /// Cache accounting of the fork
    pub cache_stats: CacheStats,

    /// Warnings raised by the fork
    pub warnings: Vec<String>,
}

/// Warning recorded when cache optimization falls back to fast-parallel
const NO_EXECUTOR_WARNING: &str =
    "cache-optimized strategy requested but no warmup executor available; falling back to fast-parallel";

const UNSUPPORTED_WARNING: &str =
    "cache-optimized strategy requested but the warmup executor does not support cache optimization; falling back to fast-parallel";

/// Fork orchestrator
///
/// Holds the warmup coordinator used for `explicit` warmup. Without one,
/// cache-optimized forks degrade to fast-parallel with a warning.
#[derive(Clone, Default)]
pub struct ForkOrchestrator {
    warmup: Option<Arc<dyn WarmupCoordinator>>,
}

impl std::fmt::Debug for ForkOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkOrchestrator")
            .field("has_warmup_coordinator", &self.warmup.is_some())
            .finish()
    }
}

impl ForkOrchestrator {
    /// Create orchestrator without a warmup coordinator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { warmup: None }
    }

    /// Create with a warmup coordinator
    #[inline]
    #[must_use]
    pub fn with_warmup_coordinator(coordinator: Arc<dyn WarmupCoordinator>) -> Self {
        Self {
            warmup: Some(coordinator),
        }
    }

    /// Create from the process-wide registration slot
    #[must_use]
    pub fn from_registered() -> Self {
        Self {
            warmup: get_warmup_executor(),
        }
    }

    /// Warmup coordinator in use
    #[inline]
    #[must_use]
    pub fn warmup_coordinator(&self) -> Option<&Arc<dyn WarmupCoordinator>> {
        self.warmup.as_ref()
    }

    /// Run all branches of `options` against children of `ctx`
    ///
    /// Must be awaited inside a tokio runtime; every branch is spawned.
    ///
    /// # Errors
    /// - [`ForkError::SchemaConflict`] before any branch starts, under the `error` policy
    /// - [`ForkError::Warmup`] if the coordinator fails
    /// - [`ForkError::Branch`] / [`ForkError::BranchPanicked`] for the first failing branch
    pub async fn fork<C, T>(
        &self,
        ctx: &C,
        options: ForkOptions<C, T>,
    ) -> Result<ForkResult<T>, ForkError>
    where
        C: InferenceContext,
        T: Send + 'static,
    {
        let ForkOptions {
            strategy,
            warmup,
            on_schema_conflict,
            branches,
        } = options;
        let n = branches.len();

        metrics::counter!("concord_fork_total", "strategy" => strategy.as_str()).increment(1);
        if n == 0 {
            tracing::debug!("fork called with no branches");
            return Ok(ForkResult::empty());
        }
        tracing::info!(
            branches = n,
            strategy = strategy.as_str(),
            ?warmup,
            scope = %ctx.scope(),
            "fork started"
        );

        let mut warnings = Vec::new();
        let (results, cache_stats) = match strategy {
            ForkStrategy::FastParallel => (run_concurrently(ctx, branches, 0).await?, CacheStats::zeroed(n)),
            ForkStrategy::CacheOptimized => {
                if on_schema_conflict != SchemaConflictPolicy::Allow {
                    let report = detect_schema_conflicts(branches.iter().map(ForkBranch::signature));
                    if report.has_conflict {
                        if on_schema_conflict == SchemaConflictPolicy::Error {
                            tracing::warn!(groups = ?report.conflicting_branch_groups, "schema conflict blocks fork");
                            return Err(ForkError::SchemaConflict(report));
                        }
                        tracing::warn!(groups = ?report.conflicting_branch_groups, "{}", report.message);
                        warnings.push(report.message);
                    }
                }

                match warmup {
                    WarmupMode::Explicit => {
                        self.run_with_explicit_warmup(ctx, branches, &mut warnings)
                            .await?
                    }
                    WarmupMode::FirstBranch => {
                        let mut rest = branches;
                        let first = rest.remove(0);
                        let mut results = run_concurrently(ctx, vec![first], 0).await?;
                        tracing::debug!("first branch completed, starting remaining branches");
                        results.extend(run_concurrently(ctx, rest, 1).await?);
                        (results, CacheStats::zeroed(n))
                    }
                    WarmupMode::None => (run_concurrently(ctx, branches, 0).await?, CacheStats::zeroed(n)),
                }
            }
        };

        tracing::info!(
            branches = n,
            warnings = warnings.len(),
            total_saved = cache_stats.total_saved,
            "fork completed"
        );
        Ok(ForkResult {
            results,
            cache_stats,
            warnings,
        })
    }

    /// Fork, then merge the ordered results
    ///
    /// # Errors
    /// Any [`fork`](Self::fork) error, or [`ForkError::Merge`]
    pub async fn fork_and_merge<C, T, S>(
        &self,
        ctx: &C,
        options: ForkOptions<C, T>,
        strategy: &S,
    ) -> Result<ForkMergeOutcome<S::Output>, ForkError>
    where
        C: InferenceContext,
        T: Send + 'static,
        S: MergeStrategy<T> + ?Sized,
    {
        let forked = self.fork(ctx, options).await?;
        let merge = strategy.merge(&forked.results)?;
        Ok(ForkMergeOutcome {
            merge,
            cache_stats: forked.cache_stats,
            warnings: forked.warnings,
        })
    }

    async fn run_with_explicit_warmup<C, T>(
        &self,
        ctx: &C,
        branches: Vec<ForkBranch<C, T>>,
        warnings: &mut Vec<String>,
    ) -> Result<(Vec<Owned<T>>, CacheStats), ForkError>
    where
        C: InferenceContext,
        T: Send + 'static,
    {
        let n = branches.len();
        let coordinator = match &self.warmup {
            Some(c) if c.supports_cache_optimization() => c,
            other => {
                let warning = if other.is_some() {
                    UNSUPPORTED_WARNING
                } else {
                    NO_EXECUTOR_WARNING
                };
                tracing::warn!("{warning}");
                metrics::counter!("concord_fork_degraded_total").increment(1);
                warnings.push(warning.to_string());
                return Ok((run_concurrently(ctx, branches, 0).await?, CacheStats::zeroed(n)));
            }
        };

        let report = coordinator
            .explicit_warmup(ctx)
            .await
            .map_err(ForkError::Warmup)?;
        tracing::debug!(
            token_cost = report.token_cost,
            cache_created_tokens = report.cache_created_tokens,
            duration_ms = report.duration_ms,
            "warmup completed"
        );

        let results = run_concurrently(ctx, branches, 0).await?;
        Ok((results, CacheStats::from_warmup(&report, n)))
    }
}

/// Fork using the process-wide warmup coordinator
///
/// # Errors
/// See [`ForkOrchestrator::fork`]
pub async fn fork<C, T>(ctx: &C, options: ForkOptions<C, T>) -> Result<ForkResult<T>, ForkError>
where
    C: InferenceContext,
    T: Send + 'static,
{
    ForkOrchestrator::from_registered().fork(ctx, options).await
}

/// Fork and merge using the process-wide warmup coordinator
///
/// # Errors
/// See [`ForkOrchestrator::fork_and_merge`]
pub async fn fork_and_merge<C, T, S>(
    ctx: &C,
    options: ForkOptions<C, T>,
    strategy: &S,
) -> Result<ForkMergeOutcome<S::Output>, ForkError>
where
    C: InferenceContext,
    T: Send + 'static,
    S: MergeStrategy<T> + ?Sized,
{
    ForkOrchestrator::from_registered()
        .fork_and_merge(ctx, options, strategy)
        .await
}

/// Spawn every branch and collect results in order
///
/// Returns on the first failure; remaining tasks are detached.
async fn run_concurrently<C, T>(
    ctx: &C,
    branches: Vec<ForkBranch<C, T>>,
    offset: usize,
) -> Result<Vec<Owned<T>>, ForkError>
where
    C: InferenceContext,
    T: Send + 'static,
{
    let tasks = branches.into_iter().enumerate().map(|(i, branch)| {
        let index = offset + i;
        let child = ctx.fork_child(index);
        let span = tracing::debug_span!("fork_branch", branch_index = index);
        let handle = tokio::spawn((branch.run)(child).instrument(span));

        async move {
            let outcome = match handle.await {
                Ok(Ok(owned)) => {
                    tracing::debug!(branch_index = index, confidence = owned.confidence(), "branch completed");
                    return Ok(owned);
                }
                Ok(Err(e)) => ForkError::Branch(e),
                Err(join) if join.is_panic() => ForkError::BranchPanicked { index },
                Err(join) => ForkError::Branch(anyhow::Error::new(join)),
            };
            tracing::debug!(branch_index = index, error = %outcome, "branch failed");
            metrics::counter!("concord_fork_branch_failures_total").increment(1);
            Err(outcome)
        }
    });

    try_join_all(tasks).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopedContext;
    use concord_merge::categorical::{weighted_vote, VoteOptions};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn constant(value: &'static str, confidence: f64) -> ForkBranch<ScopedContext, &'static str> {
        ForkBranch::new(move |ctx: ScopedContext| async move {
            Owned::new(value, confidence, ctx.scope().clone()).map_err(anyhow::Error::from)
        })
    }

    struct Unsupported;

    #[async_trait::async_trait]
    impl WarmupCoordinator for Unsupported {
        fn supports_cache_optimization(&self) -> bool {
            false
        }

        async fn explicit_warmup(&self, _ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport> {
            anyhow::bail!("must not be called")
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl WarmupCoordinator for Failing {
        fn supports_cache_optimization(&self) -> bool {
            true
        }

        async fn explicit_warmup(&self, _ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport> {
            anyhow::bail!("warmup quota exceeded")
        }
    }

    #[test]
    fn cache_stats_from_warmup() {
        let report = WarmupReport {
            token_cost: 1500,
            cache_created_tokens: 1200,
            duration_ms: 40,
        };
        let stats = CacheStats::from_warmup(&report, 3);
        assert_eq!(stats.warmup_cost, 1500);
        assert_eq!(stats.branch_cache_hits, vec![1200, 1200, 1200]);
        assert_eq!(stats.total_saved, 3600);
        assert!(!stats.is_zero());
        assert!(CacheStats::zeroed(3).is_zero());
    }

    #[tokio::test]
    async fn empty_fork_is_not_an_error() {
        let ctx = ScopedContext::new("test");
        let result = ForkOrchestrator::new()
            .fork(&ctx, ForkOptions::<ScopedContext, i32>::cache_optimized())
            .await
            .unwrap();
        assert!(result.results.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.cache_stats, CacheStats::default());
    }

    #[tokio::test]
    async fn unsupported_coordinator_degrades() {
        let ctx = ScopedContext::new("test");
        let orchestrator = ForkOrchestrator::with_warmup_coordinator(Arc::new(Unsupported));
        let options = ForkOptions::cache_optimized()
            .branch(constant("a", 0.5))
            .branch(constant("b", 0.5));

        let result = orchestrator.fork(&ctx, options).await.unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("does not support cache optimization"));
        assert!(result.cache_stats.is_zero());
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn warmup_failure_is_hard() {
        let ctx = ScopedContext::new("test");
        let orchestrator = ForkOrchestrator::with_warmup_coordinator(Arc::new(Failing));
        let options = ForkOptions::cache_optimized().branch(constant("a", 0.5));

        let err = orchestrator.fork(&ctx, options).await.unwrap_err();
        assert!(matches!(err, ForkError::Warmup(_)));
        assert_eq!(err.to_string(), "warmup quota exceeded");
    }

    #[tokio::test]
    async fn branches_receive_indexed_children() {
        let ctx = ScopedContext::new("support");
        let branches = (0..4).map(|_| {
            ForkBranch::new(|child: ScopedContext| async move {
                let index = child.branch_index().unwrap_or(usize::MAX);
                Owned::new(index, 1.0, child.scope().clone()).map_err(anyhow::Error::from)
            })
        });
        let options = ForkOptions::fast_parallel().with_branches(branches);

        let result = ForkOrchestrator::new().fork(&ctx, options).await.unwrap();
        let indices: Vec<usize> = result.results.iter().map(|r| *r.value()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(result.results.iter().all(|r| r.scope().as_str() == "support"));
    }

    #[tokio::test]
    async fn first_branch_mode_keeps_order() {
        let ctx = ScopedContext::new("test");
        let slow = ForkBranch::new(|ctx: ScopedContext| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Owned::new("slow", 0.9, ctx.scope().clone()).map_err(anyhow::Error::from)
        });
        let options = ForkOptions::cache_optimized()
            .with_warmup(WarmupMode::FirstBranch)
            .branch(slow)
            .branch(constant("fast", 0.8));

        let result = ForkOrchestrator::new().fork(&ctx, options).await.unwrap();
        let values: Vec<&str> = result.results.iter().map(|r| *r.value()).collect();
        assert_eq!(values, vec!["slow", "fast"]);
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn fork_and_merge_votes() {
        let ctx = ScopedContext::new("triage");
        let options = ForkOptions::fast_parallel()
            .branch(constant("urgent", 0.9))
            .branch(constant("normal", 0.6))
            .branch(constant("urgent", 0.8));

        let outcome = ForkOrchestrator::new()
            .fork_and_merge(&ctx, options, &weighted_vote(VoteOptions::default()))
            .await
            .unwrap();
        assert_eq!(*outcome.merge.value(), "urgent");
        assert!((outcome.merge.confidence() - 1.7 / 2.3).abs() < 1e-9);
        assert_eq!(outcome.merge.provenance.contributing_branches, vec![0, 2]);
        assert!(outcome.cache_stats.is_zero());
    }

    #[tokio::test]
    async fn merge_error_surfaces_after_fork() {
        let ctx = ScopedContext::new("triage");
        let options = ForkOptions::fast_parallel().branch(constant("a", 0.1));
        let strategy = weighted_vote(VoteOptions::default().with_min_confidence(0.5));

        let err = ForkOrchestrator::new()
            .fork_and_merge(&ctx, options, &strategy)
            .await
            .unwrap_err();
        assert!(matches!(err, ForkError::Merge(_)));
    }
}
