//! rok-testkit
//!
//! Deterministic building blocks for coordinator scenario tests: a manual
//! clock shared between store and coordinator, call spies, an event-recording
//! log sink, and a ready-made in-memory harness. Downstream crates can use
//! the same pieces for their own `run_once` scenario tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rok_core::{RunCoordinator, RunLog};
use rok_store::{Clock, MemoryRecordStore};
use uuid::Uuid;

/// A clock that only moves when the test says so.
///
/// Hand [`clock()`][ManualClock::clock] to both the store and the
/// coordinator so lease stamps and expiry checks read the same instant.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().expect("manual clock mutex poisoned"))
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("manual clock mutex poisoned")
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock mutex poisoned");
        *now += chrono::Duration::from_std(by).expect("advance out of range");
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Shared invocation counter for spying on preprocess/handler/postprocess.
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Increment and return the pre-increment count.
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// [`RunLog`] sink that records every event as `"<event>:<key>"`.
#[derive(Default)]
pub struct RecordingLog {
    events: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("recording log mutex poisoned").clone()
    }

    fn push(&self, event: &str, key: &str) {
        self.events
            .lock()
            .expect("recording log mutex poisoned")
            .push(format!("{event}:{key}"));
    }
}

impl RunLog for RecordingLog {
    fn started(&self, key: &str) {
        self.push("started", key);
    }
    fn retry(&self, key: &str) {
        self.push("retry", key);
    }
    fn replay(&self, key: &str) {
        self.push("replay", key);
    }
    fn finished(&self, key: &str) {
        self.push("finished", key);
    }
    fn timeout(&self, key: &str, _ttl: Duration) {
        self.push("timeout", key);
    }
    fn error(&self, key: &str, _err: &anyhow::Error) {
        self.push("error", key);
    }
    fn already_running(&self, key: &str) {
        self.push("already_running", key);
    }
    fn mark_retryable(&self, key: &str) {
        self.push("mark_retryable", key);
    }
    fn mark_non_retryable(&self, key: &str) {
        self.push("mark_non_retryable", key);
    }
}

/// Coordinator + memory store + manual clock + recording log, wired together.
pub struct Harness {
    pub coordinator: RunCoordinator,
    pub store: Arc<MemoryRecordStore>,
    pub clock: ManualClock,
    pub log: Arc<RecordingLog>,
}

pub fn memory_harness() -> Harness {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryRecordStore::with_clock(clock.clock()));
    let log = Arc::new(RecordingLog::default());
    let coordinator = RunCoordinator::new(store.clone())
        .with_clock(clock.clock())
        .with_log(log.clone());
    Harness {
        coordinator,
        store,
        clock,
        log,
    }
}

/// Collision-free key for tests that share a store (or a live database).
pub fn unique_key(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}
