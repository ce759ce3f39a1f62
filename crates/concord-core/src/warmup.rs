//! Cache warmup coordination
//!
//! A [`WarmupCoordinator`] primes a provider's shared prompt cache before
//! the branches of a fork run concurrently. Coordinators are implemented by
//! provider integrations and handed to [`ForkOrchestrator`](crate::ForkOrchestrator)
//! explicitly.
//!
//! For integrations that cannot thread a coordinator through, a process-wide
//! registration slot is kept ([`register_warmup_executor`]). It is read only
//! by [`ForkOrchestrator::from_registered`](crate::ForkOrchestrator::from_registered)
//! and the free [`fork`](crate::fork) function.

use crate::context::InferenceContext;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cache warmup coordinator
#[async_trait::async_trait]
pub trait WarmupCoordinator: Send + Sync {
    /// Whether the provider can share a warmed cache across branches
    fn supports_cache_optimization(&self) -> bool;

    /// Prime the cache for `ctx`
    ///
    /// # Errors
    /// Any error is a hard failure of the fork.
    async fn explicit_warmup(&self, ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport>;
}

/// Cost of a warmup call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmupReport {
    /// Tokens billed for the warmup call
    pub token_cost: u64,

    /// Tokens written to the shared cache
    pub cache_created_tokens: u64,

    /// Wall-clock duration
    pub duration_ms: u64,
}

static REGISTERED: Lazy<RwLock<Option<Arc<dyn WarmupCoordinator>>>> =
    Lazy::new(|| RwLock::new(None));

/// Register the process-wide warmup coordinator
///
/// Replaces any previous registration.
pub fn register_warmup_executor(coordinator: Arc<dyn WarmupCoordinator>) {
    *REGISTERED.write() = Some(coordinator);
    tracing::debug!("warmup executor registered");
}

/// Clear the process-wide warmup coordinator
pub fn clear_warmup_executor() {
    *REGISTERED.write() = None;
}

/// Currently registered warmup coordinator
#[must_use]
pub fn get_warmup_executor() -> Option<Arc<dyn WarmupCoordinator>> {
    REGISTERED.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopedContext;

    struct Fixed;

    #[async_trait::async_trait]
    impl WarmupCoordinator for Fixed {
        fn supports_cache_optimization(&self) -> bool {
            true
        }

        async fn explicit_warmup(&self, _ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport> {
            Ok(WarmupReport {
                token_cost: 100,
                cache_created_tokens: 90,
                duration_ms: 5,
            })
        }
    }

    // Single test touching the global slot; other tests inject coordinators.
    #[tokio::test]
    async fn registration_slot_round_trip() {
        clear_warmup_executor();
        assert!(get_warmup_executor().is_none());

        register_warmup_executor(Arc::new(Fixed));
        let coordinator = get_warmup_executor().unwrap();
        assert!(coordinator.supports_cache_optimization());

        let report = coordinator
            .explicit_warmup(&ScopedContext::new("test"))
            .await
            .unwrap();
        assert_eq!(report.cache_created_tokens, 90);

        clear_warmup_executor();
        assert!(get_warmup_executor().is_none());
    }
}
