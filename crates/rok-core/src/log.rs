//! Lifecycle event sink.
//!
//! A write-only side channel: the coordinator reports what it decided and how
//! the attempt ended, and nothing it reports can perturb the state machine —
//! every method is infallible by signature and MUST NOT panic. The no-op
//! default methods mean a sink overrides only the events it cares about.

use std::time::Duration;

use tracing::{info, warn};

pub trait RunLog: Send + Sync {
    /// A fresh attempt won the insert and is about to run the handler.
    fn started(&self, _key: &str) {}
    /// A retry attempt won the claim and is about to run the handler.
    fn retry(&self, _key: &str) {}
    /// The key is already completed; the stored response is being replayed.
    fn replay(&self, _key: &str) {}
    /// The attempt completed and the record is durably `Completed`.
    fn finished(&self, _key: &str) {}
    /// The handler breached its hard deadline.
    fn timeout(&self, _key: &str, _ttl: Duration) {}
    /// The handler (or postprocess) failed; fired before classification.
    fn error(&self, _key: &str, _err: &anyhow::Error) {}
    /// Arbitration rejected the attempt: another invocation holds the lease.
    fn already_running(&self, _key: &str) {}
    /// The failure was recorded as retryable.
    fn mark_retryable(&self, _key: &str) {}
    /// The failure was recorded as non-retryable.
    fn mark_non_retryable(&self, _key: &str) {}
}

/// Disables logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunLog;

impl RunLog for NoopRunLog {}

/// Emits every lifecycle event as a `tracing` event under the crate's target.
///
/// This sink never installs a subscriber — wiring `tracing-subscriber` (or
/// any other collector) stays with the embedding application.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingRunLog;

impl RunLog for TracingRunLog {
    fn started(&self, key: &str) {
        info!(key, "run started");
    }

    fn retry(&self, key: &str) {
        info!(key, "run retrying after earlier retryable failure");
    }

    fn replay(&self, key: &str) {
        info!(key, "run already completed; replaying stored response");
    }

    fn finished(&self, key: &str) {
        info!(key, "run completed");
    }

    fn timeout(&self, key: &str, ttl: Duration) {
        warn!(key, ttl_ms = ttl.as_millis() as u64, "run timed out");
    }

    fn error(&self, key: &str, err: &anyhow::Error) {
        warn!(key, error = %format!("{err:#}"), "run failed");
    }

    fn already_running(&self, key: &str) {
        info!(key, "run rejected; another invocation is running");
    }

    fn mark_retryable(&self, key: &str) {
        info!(key, "failure recorded as retryable");
    }

    fn mark_non_retryable(&self, key: &str) {
        warn!(key, "failure recorded as non-retryable");
    }
}
