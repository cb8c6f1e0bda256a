//! The coordinator facade: the single public entry point.
//!
//! Wires arbitration and execution together and maps every failure back into
//! a store transition (or deliberately not — see the postprocess note on
//! [`RunCoordinator::run_once`]).

use std::sync::Arc;

use rok_schemas::RunStatus;
use rok_store::{system_clock, Clock, RecordStore};

use crate::decision::{self, DecideFailure, Decision};
use crate::error::{is_transient, RunError};
use crate::log::{NoopRunLog, RunLog};
use crate::pipeline::{self, PipelineFailure};
use crate::request::Request;

/// Runs a keyed operation at most once to completion, however many times it
/// is invoked, across every process sharing the record store.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct RunCoordinator {
    store: Arc<dyn RecordStore>,
    log: Arc<dyn RunLog>,
    clock: Clock,
}

impl RunCoordinator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            log: Arc::new(NoopRunLog),
            clock: system_clock(),
        }
    }

    /// Attach a lifecycle event sink.
    pub fn with_log(mut self, log: Arc<dyn RunLog>) -> Self {
        self.log = log;
        self
    }

    /// Replace the clock used for lease-expiry checks. The clock must be
    /// non-decreasing; tests share one manual clock with the store.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Execute `request` under `key` at most once to completion.
    ///
    /// Repeat invocations of a completed key replay the stored response
    /// through `postprocess` without re-entering the handler. Failed attempts
    /// are recorded retryable (next attempt re-runs, `retry = true`) or
    /// non-retryable (every later attempt fails with
    /// [`RunError::OperationFailed`]) according to the default predicate: a
    /// failure is retryable iff its chain carries the
    /// [`Transient`][crate::Transient] marker.
    ///
    /// # Postprocess failures
    ///
    /// Completion is recorded **before** `postprocess` runs. A `postprocess`
    /// failure is therefore surfaced to this caller but never re-classifies
    /// the key: the record stays `Completed`, and every subsequent invocation
    /// replays the stored response and runs `postprocess` again. The
    /// *operation* is at-most-once; the response transformation is not
    /// protected.
    ///
    /// # Errors
    ///
    /// [`RunError::InvalidKey`] for an empty or whitespace-only key; otherwise
    /// the taxonomy on [`RunError`].
    pub async fn run_once<Req, Resp, Out>(
        &self,
        key: &str,
        request: Request<Req, Resp, Out>,
    ) -> Result<Out, RunError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        Out: Send + 'static,
    {
        self.run_once_with(key, request, is_transient).await
    }

    /// [`run_once`][Self::run_once] with a caller-supplied retryability
    /// predicate replacing the transient-marker default.
    pub async fn run_once_with<Req, Resp, Out, F>(
        &self,
        key: &str,
        request: Request<Req, Resp, Out>,
        is_retryable: F,
    ) -> Result<Out, RunError>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        Out: Send + 'static,
        F: Fn(&anyhow::Error) -> bool,
    {
        if key.trim().is_empty() {
            return Err(RunError::InvalidKey);
        }

        let decision =
            match decision::decide(self.store.as_ref(), &self.clock, key, &request).await {
                Ok(decision) => decision,
                Err(DecideFailure::Reject(err)) => {
                    if matches!(err, RunError::AlreadyRunning { .. }) {
                        self.log.already_running(key);
                    }
                    return Err(err);
                }
                Err(DecideFailure::User { source, leased }) => {
                    return Err(self.classify(key, source, leased, &is_retryable).await);
                }
            };

        match &decision {
            Decision::Fresh(_) => self.log.started(key),
            Decision::Retry(_) => self.log.retry(key),
            Decision::Replay(_) => self.log.replay(key),
        }

        match pipeline::run_to_completion(self.store.as_ref(), self.log.as_ref(), key, &request, decision)
            .await
        {
            Ok(out) => Ok(out),
            Err(PipelineFailure::Timeout { ttl }) => {
                self.log.timeout(key, ttl);
                if let Err(e) = self.store.finish(key, None, RunStatus::FailedRetryable).await {
                    // The recording failure supersedes: the record stays
                    // Running and lease expiry will reclaim it.
                    return Err(RunError::Store(e));
                }
                self.log.mark_retryable(key);
                Err(RunError::Timeout {
                    key: key.to_string(),
                    ttl_ms: ttl.as_millis() as u64,
                })
            }
            Err(PipelineFailure::Handler(source)) => {
                Err(self.classify(key, source, true, &is_retryable).await)
            }
            // The record is already Completed; classify for the caller only.
            Err(PipelineFailure::Postprocess(source)) => {
                Err(self.classify(key, source, false, &is_retryable).await)
            }
            Err(PipelineFailure::Fatal(err)) => Err(err),
        }
    }

    /// Classify a user-code failure and, when this attempt held the lease,
    /// record it before surfacing.
    async fn classify<F>(
        &self,
        key: &str,
        source: anyhow::Error,
        record: bool,
        is_retryable: &F,
    ) -> RunError
    where
        F: Fn(&anyhow::Error) -> bool,
    {
        self.log.error(key, &source);
        let retryable = is_retryable(&source);

        if record {
            let status = if retryable {
                RunStatus::FailedRetryable
            } else {
                RunStatus::FailedNonRetryable
            };
            if let Err(e) = self.store.finish(key, None, status).await {
                return RunError::Store(e);
            }
            if retryable {
                self.log.mark_retryable(key);
            } else {
                self.log.mark_non_retryable(key);
            }
        }

        if retryable {
            RunError::Retryable {
                key: key.to_string(),
                source,
            }
        } else {
            RunError::NonRetryable {
                key: key.to_string(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rok_store::MemoryRecordStore;

    fn coordinator() -> (RunCoordinator, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        (RunCoordinator::new(store.clone()), store)
    }

    fn double_request() -> Request<i64, i64, i64> {
        Request::new(
            || async { Ok(21) },
            |req, _retry| async move { Ok(req * 2) },
            |resp, _replayed| async move { Ok(resp) },
        )
    }

    #[tokio::test]
    async fn fresh_run_completes_and_persists_the_response() {
        let (coord, store) = coordinator();

        let out = coord.run_once("k", double_request()).await.unwrap();
        assert_eq!(out, 42);

        let row = store.load("k").await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Completed);
        assert_eq!(row.response.as_deref(), Some("42"));
        assert!(row.finished_at.is_some());
        assert!(row.request.is_none());
    }

    #[tokio::test]
    async fn blank_keys_are_a_usage_error() {
        let (coord, store) = coordinator();

        for key in ["", "   ", "\t\n"] {
            let err = coord.run_once(key, double_request()).await.unwrap_err();
            assert!(matches!(err, RunError::InvalidKey));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn preprocess_failure_before_insert_leaves_no_record() {
        let (coord, store) = coordinator();

        let request: Request<i64, i64, i64> = Request::new(
            || async { Err(anyhow!("input unavailable")) },
            |req, _| async move { Ok(req) },
            |resp, _| async move { Ok(resp) },
        );
        let err = coord.run_once("k", request).await.unwrap_err();
        assert!(matches!(err, RunError::NonRetryable { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn custom_predicate_overrides_the_marker_default() {
        let (coord, store) = coordinator();

        let request: Request<i64, i64, i64> = Request::new(
            || async { Ok(0) },
            |_, _| async { Err(anyhow!("connection reset by peer")) },
            |resp, _| async move { Ok(resp) },
        );
        let err = coord
            .run_once_with("k", request, |e| e.to_string().contains("connection reset"))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Retryable { .. }));

        let row = store.load("k").await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::FailedRetryable);
    }
}
