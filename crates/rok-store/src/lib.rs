//! rok-store
//!
//! The durable per-key record store behind the run-once coordinator, and the
//! only plug point a deployment has to supply.
//!
//! # Contract
//!
//! Implementations expose four operations — [`RecordStore::insert`],
//! [`RecordStore::load`], [`RecordStore::finish`], [`RecordStore::claim`] —
//! each atomic with respect to concurrent callers on the same key, each in its
//! own transaction. Transactions never span user handler execution: the
//! coordinator runs handlers entirely outside the store.
//!
//! Correctness rests on two store-level primitives:
//!
//! - a unique constraint on `key`, so concurrent first inserts have at most
//!   one winner (losers see [`StoreError::DuplicateKey`]);
//! - a compare-and-set `claim` fenced on both the observed status and the
//!   observed lease start, so at most one of N concurrent reclaimers wins.
//!
//! Two implementations ship here: [`MemoryRecordStore`] (embedded, tests,
//! single-process) and [`PgRecordStore`] (PostgreSQL via sqlx, the reference
//! multi-process deployment).

mod memory;
mod pg;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rok_schemas::{NewRunRecord, RunRecord, RunStatus};

pub use memory::MemoryRecordStore;
pub use pg::{PgRecordStore, StoreStatus, ENV_DB_URL};

/// Injectable time source.
///
/// The memory store stamps rows from its clock; the coordinator evaluates
/// lease expiry against its own. Tests share one manual clock across both so
/// time is fully deterministic. Clocks must be non-decreasing.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The wall clock. Production default everywhere a [`Clock`] is accepted.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Store-level failure.
///
/// `DuplicateKey` is part of the arbitration protocol (an insert race lost),
/// not an error in the operational sense; everything else is `Backend` and is
/// treated as fatal by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a record with this key already exists")]
    DuplicateKey,
    #[error("record store backend failure")]
    Backend(#[from] anyhow::Error),
}

/// Durable per-key record store.
///
/// See the crate docs for the atomicity contract. All timestamps are stamped
/// from the store's own clock (`now()` in Postgres), never the caller's.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a fresh row with `status = Running` and `started_at = now`.
    ///
    /// # Errors
    /// [`StoreError::DuplicateKey`] if a row with this key already exists —
    /// callers MUST treat that as "lost the race", re-load, and arbitrate.
    async fn insert(&self, record: NewRunRecord) -> Result<(), StoreError>;

    /// Read the current row by key.
    async fn load(&self, key: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Unconditionally set `finished_at = now`, the given status, and the
    /// given response blob. Returns rows affected (0 if the key is absent).
    async fn finish(
        &self,
        key: &str,
        response: Option<String>,
        status: RunStatus,
    ) -> Result<u64, StoreError>;

    /// Compare-and-set re-acquisition of the running lease.
    ///
    /// Atomically: if the row's current status equals `expected` AND its
    /// current `started_at` equals `observed_started_at`, set
    /// `status = Running`, `started_at = now`, and return `true`. Otherwise
    /// leave the row untouched and return `false`.
    ///
    /// The `started_at` fence is what arbitrates N concurrent reclaimers of an
    /// expired `Running` lease: after the first claim wins, the row still
    /// reads `Running`, but its lease start has moved, so every other claimer
    /// fenced on the old value loses.
    async fn claim(
        &self,
        key: &str,
        expected: RunStatus,
        observed_started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Housekeeping: delete finished rows (`finished_at` set) older than
    /// `cutoff`. Never touches `Running` rows. Returns rows deleted.
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
