//! In-memory [`RecordStore`] for embedded use and tests.
//!
//! Single-process only: the "transaction per operation" contract degenerates
//! to one mutex acquisition per call, which gives the same per-key atomicity.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rok_schemas::{NewRunRecord, RunRecord, RunStatus};

use crate::{system_clock, Clock, RecordStore, StoreError};

pub struct MemoryRecordStore {
    rows: Mutex<HashMap<String, RunRecord>>,
    clock: Clock,
}

impl MemoryRecordStore {
    /// Store stamping rows from the wall clock.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Store stamping rows from an injected clock. Tests pass a manual clock
    /// shared with the coordinator so lease expiry is deterministic.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of rows currently held. Test observability.
    pub fn len(&self) -> usize {
        self.rows.lock().expect("record store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: NewRunRecord) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().expect("record store mutex poisoned");
        if rows.contains_key(&record.key) {
            return Err(StoreError::DuplicateKey);
        }
        let now = (*self.clock)();
        rows.insert(
            record.key.clone(),
            RunRecord {
                key: record.key,
                started_at: now,
                finished_at: None,
                status: RunStatus::Running,
                request: record.request,
                response: None,
            },
        );
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<RunRecord>, StoreError> {
        let rows = self.rows.lock().expect("record store mutex poisoned");
        Ok(rows.get(key).cloned())
    }

    async fn finish(
        &self,
        key: &str,
        response: Option<String>,
        status: RunStatus,
    ) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("record store mutex poisoned");
        match rows.get_mut(key) {
            Some(row) => {
                row.finished_at = Some((*self.clock)());
                row.status = status;
                row.response = response;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn claim(
        &self,
        key: &str,
        expected: RunStatus,
        observed_started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().expect("record store mutex poisoned");
        match rows.get_mut(key) {
            Some(row) if row.status == expected && row.started_at == observed_started_at => {
                row.status = RunStatus::Running;
                row.started_at = (*self.clock)();
                row.finished_at = None;
                row.response = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().expect("record store mutex poisoned");
        let before = rows.len();
        rows.retain(|_, row| match row.finished_at {
            Some(finished_at) => finished_at >= cutoff,
            None => true,
        });
        Ok((before - rows.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> NewRunRecord {
        NewRunRecord {
            key: key.to_string(),
            request: None,
        }
    }

    #[tokio::test]
    async fn insert_is_first_writer_wins() {
        let store = MemoryRecordStore::new();
        store.insert(record("k")).await.unwrap();
        let err = store.insert(record("k")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey));

        let row = store.load("k").await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Running);
        assert!(row.finished_at.is_none());
    }

    #[tokio::test]
    async fn claim_requires_matching_status_and_lease_start() {
        let store = MemoryRecordStore::new();
        store.insert(record("k")).await.unwrap();
        store.finish("k", None, RunStatus::FailedRetryable).await.unwrap();
        let row = store.load("k").await.unwrap().unwrap();

        // First claimer with the observed lease start wins.
        assert!(store
            .claim("k", RunStatus::FailedRetryable, row.started_at)
            .await
            .unwrap());

        // Second claimer fenced on the stale observation loses: status moved
        // to Running and started_at moved forward.
        assert!(!store
            .claim("k", RunStatus::FailedRetryable, row.started_at)
            .await
            .unwrap());

        let reclaimed = store.load("k").await.unwrap().unwrap();
        assert_eq!(reclaimed.status, RunStatus::Running);
        assert!(reclaimed.finished_at.is_none());
    }

    #[tokio::test]
    async fn expired_running_lease_is_claimed_by_exactly_one() {
        let store = MemoryRecordStore::new();
        store.insert(record("k")).await.unwrap();
        let row = store.load("k").await.unwrap().unwrap();

        assert!(store
            .claim("k", RunStatus::Running, row.started_at)
            .await
            .unwrap());
        // Same observation replayed: the row is Running either way, but the
        // lease start has moved, so the stale claimer must lose.
        assert!(!store
            .claim("k", RunStatus::Running, row.started_at)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn finish_stamps_and_overwrites() {
        let store = MemoryRecordStore::new();
        store.insert(record("k")).await.unwrap();

        let n = store
            .finish("k", Some("42".to_string()), RunStatus::Completed)
            .await
            .unwrap();
        assert_eq!(n, 1);

        let row = store.load("k").await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Completed);
        assert_eq!(row.response.as_deref(), Some("42"));
        assert!(row.finished_at.is_some());

        assert_eq!(store.finish("missing", None, RunStatus::Completed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn purge_drops_old_finished_rows_only() {
        let store = MemoryRecordStore::new();
        store.insert(record("done")).await.unwrap();
        store.finish("done", Some("1".into()), RunStatus::Completed).await.unwrap();
        store.insert(record("live")).await.unwrap();

        let deleted = store
            .purge_finished_before(Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.load("done").await.unwrap().is_none());
        assert!(store.load("live").await.unwrap().is_some());
    }
}
