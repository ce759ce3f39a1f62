//! Testing utilities for the Concord workspace
//!
//! Shared test helpers, fixtures, and warmup doubles.

#![allow(missing_docs)]

use concord_core::{ForkBranch, InferenceContext, ScopedContext, WarmupCoordinator, WarmupReport};
use concord_owned::Owned;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

/// Install a `tracing` subscriber honoring `RUST_LOG`, once per process
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Shared, ordered record of events across concurrently running branches
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Position of the first occurrence of `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == entry)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Branch that logs `start:{label}`, sleeps, logs `end:{label}` and returns `value`
pub fn scripted_branch<T>(
    log: &ExecutionLog,
    label: &str,
    value: T,
    confidence: f64,
    delay: Duration,
) -> ForkBranch<ScopedContext, T>
where
    T: Send + 'static,
{
    let log = log.clone();
    let label = label.to_string();
    ForkBranch::new(move |ctx: ScopedContext| async move {
        log.record(format!("start:{label}"));
        tokio::time::sleep(delay).await;
        log.record(format!("end:{label}"));
        Owned::new(value, confidence, ctx.scope().clone()).map_err(anyhow::Error::from)
    })
}

/// Branch that fails with `message` after `delay`
pub fn failing_branch<T>(message: &str, delay: Duration) -> ForkBranch<ScopedContext, T>
where
    T: Send + 'static,
{
    let message = message.to_string();
    ForkBranch::new(move |_ctx: ScopedContext| async move {
        tokio::time::sleep(delay).await;
        Err::<Owned<T>, _>(anyhow::anyhow!(message))
    })
}

/// Branch that panics when polled
pub fn panicking_branch<T>() -> ForkBranch<ScopedContext, T>
where
    T: Send + 'static,
{
    ForkBranch::new(|_ctx: ScopedContext| explode::<T>())
}

async fn explode<T>() -> anyhow::Result<Owned<T>> {
    panic!("branch exploded")
}

/// Warmup double returning a fixed report and counting calls
#[derive(Debug)]
pub struct RecordingWarmup {
    report: WarmupReport,
    calls: AtomicUsize,
    log: Option<ExecutionLog>,
}

impl RecordingWarmup {
    pub fn new(report: WarmupReport) -> Self {
        Self {
            report,
            calls: AtomicUsize::new(0),
            log: None,
        }
    }

    /// Also record `warmup` in `log` when called
    pub fn with_log(mut self, log: &ExecutionLog) -> Self {
        self.log = Some(log.clone());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WarmupCoordinator for RecordingWarmup {
    fn supports_cache_optimization(&self) -> bool {
        true
    }

    async fn explicit_warmup(&self, _ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.record("warmup");
        }
        Ok(self.report)
    }
}

/// Warmup double that reports no cache optimization support
#[derive(Debug, Default)]
pub struct UnsupportedWarmup {
    calls: AtomicUsize,
}

impl UnsupportedWarmup {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl WarmupCoordinator for UnsupportedWarmup {
    fn supports_cache_optimization(&self) -> bool {
        false
    }

    async fn explicit_warmup(&self, _ctx: &dyn InferenceContext) -> anyhow::Result<WarmupReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("cache optimization not supported")
    }
}
