//! rok-core
//!
//! At-most-once execution of keyed operations over a shared record store.
//!
//! Callers hand [`RunCoordinator::run_once`] an idempotency key and a
//! [`Request`] (preprocess → handler → postprocess plus lease/persistence
//! knobs). The coordinator arbitrates against the store and either runs the
//! handler, replays the stored response, or rejects the attempt. Retried
//! deliveries of the same key therefore cost at most one completed execution.
//!
//! # Per-key lifecycle
//!
//! ```text
//!              insert OK
//!       ─────────────────────▶ RUNNING
//!                                 │
//!   finish(COMPLETED)             │ handler ok
//!    ◀────────────────────────────┤
//!                                 │ handler err retryable / timeout
//!       ──────────────────────────┤   finish(FAILED_RETRYABLE)
//!   claim(FAILED_RETRYABLE) won   │ handler err non-retryable
//!       ◀─────────────────────────    finish(FAILED_NON_RETRYABLE)
//!
//!   RUNNING + lease expired : claim(RUNNING) won → RUNNING (retry)
//!   COMPLETED               : terminal; repeats replay the response
//!   FAILED_NON_RETRYABLE    : terminal; repeats fail without running
//! ```
//!
//! Mutual exclusion comes entirely from the store: the unique-key insert
//! picks one winner among fresh attempts, and the fenced claim picks one
//! winner among re-attempts. The coordinator holds no locks and no threads of
//! its own; everything is async on the embedding runtime.
//!
//! # What this does NOT give you
//!
//! At-most-once applies to *completion of the handler*, not to its side
//! effects against third systems (run those under their own keys), and not to
//! `postprocess` (see [`RunCoordinator::run_once`]).

mod codec;
mod coordinator;
mod decision;
mod error;
mod log;
mod pipeline;
mod request;

pub use codec::{BlobCodec, CodecError, JsonCodec};
pub use coordinator::RunCoordinator;
pub use error::{is_transient, transient, RunError, Transient};
pub use log::{NoopRunLog, RunLog, TracingRunLog};
pub use request::Request;

pub use rok_schemas::{NewRunRecord, RunRecord, RunStatus};
pub use rok_store::{
    system_clock, Clock, MemoryRecordStore, PgRecordStore, RecordStore, StoreError,
};
