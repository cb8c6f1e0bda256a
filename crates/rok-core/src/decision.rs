//! Shared-state arbitration: what to do with one incoming invocation.
//!
//! Exactly one of: run fresh, run as retry, replay the stored response, or
//! reject. The store's unique-key insert and fenced claim are the only
//! synchronization — the coordinator itself holds no locks, so any number of
//! processes can arbitrate the same key concurrently and at most one proceeds
//! to run.

use anyhow::anyhow;
use chrono::Duration as ChronoDuration;
use rok_schemas::{NewRunRecord, RunRecord, RunStatus};
use rok_store::{Clock, RecordStore, StoreError};

use crate::codec::CodecError;
use crate::error::RunError;
use crate::request::{Persistence, Request};

/// What the arbitration decided for this invocation.
pub(crate) enum Decision<Req, Resp> {
    /// First attempt for this key; the handler must run with `retry = false`.
    Fresh(Req),
    /// This attempt claimed a retryable or expired record; the handler must
    /// run with `retry = true`.
    Retry(Req),
    /// The key already completed; deliver the stored response.
    Replay(Resp),
}

/// Why arbitration did not produce a [`Decision`].
pub(crate) enum DecideFailure {
    /// Rejection or fatal condition. Passed through as-is; nothing is
    /// recorded against the key.
    Reject(RunError),
    /// User code (`preprocess`) failed. `leased` says whether this attempt
    /// held the running lease when it happened — if so the facade must record
    /// the classified failure, if not the key was never touched.
    User { source: anyhow::Error, leased: bool },
}

fn reject_store(e: StoreError) -> DecideFailure {
    DecideFailure::Reject(RunError::Store(e))
}

fn reject_codec(e: CodecError) -> DecideFailure {
    DecideFailure::Reject(RunError::Codec(e))
}

fn inconsistent(msg: String) -> DecideFailure {
    DecideFailure::Reject(RunError::Store(StoreError::Backend(anyhow!(msg))))
}

pub(crate) async fn decide<Req, Resp, Out>(
    store: &dyn RecordStore,
    clock: &Clock,
    key: &str,
    request: &Request<Req, Resp, Out>,
) -> Result<Decision<Req, Resp>, DecideFailure>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Out: Send + 'static,
{
    let record = match store.load(key).await.map_err(reject_store)? {
        Some(record) => record,
        None => {
            // No record yet: materialize the input and race for the insert.
            // `preprocess` runs before we touch the store, so a failure here
            // leaves no trace of the key.
            let req = request
                .produce_input()
                .await
                .map_err(|source| DecideFailure::User {
                    source,
                    leased: false,
                })?;

            let blob = match &request.persistence {
                Persistence::Persistent { codec } => {
                    Some(codec.encode(&req).map_err(reject_codec)?)
                }
                Persistence::Ephemeral => None,
            };

            match store
                .insert(NewRunRecord {
                    key: key.to_string(),
                    request: blob,
                })
                .await
            {
                Ok(()) => return Ok(Decision::Fresh(req)),
                Err(StoreError::DuplicateKey) => {
                    // Lost the insert race; read the winner's row and
                    // arbitrate against it like any other repeat.
                    match store.load(key).await.map_err(reject_store)? {
                        Some(record) => record,
                        // Row vanished between the conflict and the re-read
                        // (external repair). The next client retry starts
                        // clean; report contention for this one.
                        None => {
                            return Err(DecideFailure::Reject(RunError::AlreadyRunning {
                                key: key.to_string(),
                            }))
                        }
                    }
                }
                Err(e) => return Err(reject_store(e)),
            }
        }
    };

    match record.status {
        RunStatus::Completed => {
            let blob = record.response.as_deref().ok_or_else(|| {
                inconsistent(format!("completed record `{key}` has no response blob"))
            })?;
            let resp = request.response_codec.decode(blob).map_err(reject_codec)?;
            Ok(Decision::Replay(resp))
        }

        RunStatus::FailedNonRetryable => Err(DecideFailure::Reject(RunError::OperationFailed {
            key: key.to_string(),
        })),

        RunStatus::FailedRetryable => {
            claim_and_rehydrate(store, key, request, &record, RunStatus::FailedRetryable).await
        }

        RunStatus::Running => {
            let now = (**clock)();
            let expired = request.ttl.is_some_and(|ttl| match ChronoDuration::from_std(ttl) {
                Ok(lease) => now >= record.started_at + lease,
                // A lease too large for the calendar never expires.
                Err(_) => false,
            });
            if expired {
                claim_and_rehydrate(store, key, request, &record, RunStatus::Running).await
            } else {
                Err(DecideFailure::Reject(RunError::AlreadyRunning {
                    key: key.to_string(),
                }))
            }
        }

        RunStatus::Initial => Err(inconsistent(format!(
            "record `{key}` was persisted with the pre-insertion status"
        ))),
    }
}

/// Race for the re-run lease; the winner rehydrates the input and retries.
async fn claim_and_rehydrate<Req, Resp, Out>(
    store: &dyn RecordStore,
    key: &str,
    request: &Request<Req, Resp, Out>,
    record: &RunRecord,
    expected: RunStatus,
) -> Result<Decision<Req, Resp>, DecideFailure>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Out: Send + 'static,
{
    let won = store
        .claim(key, expected, record.started_at)
        .await
        .map_err(reject_store)?;
    if !won {
        return Err(DecideFailure::Reject(RunError::AlreadyRunning {
            key: key.to_string(),
        }));
    }

    let req = match &request.persistence {
        Persistence::Persistent { codec } => {
            let blob = record.request.as_deref().ok_or_else(|| {
                inconsistent(format!("persistent record `{key}` has no request blob"))
            })?;
            codec.decode(blob).map_err(reject_codec)?
        }
        // At this point the lease is ours, so a preprocess failure must be
        // recorded or the key wedges until the lease expires again.
        Persistence::Ephemeral => {
            request
                .produce_input()
                .await
                .map_err(|source| DecideFailure::User {
                    source,
                    leased: true,
                })?
        }
    };

    Ok(Decision::Retry(req))
}
