//! rok-schemas
//!
//! Canonical record types shared by the store implementations and the
//! coordinator. This crate owns no behavior beyond status conversions; it
//! exists so `rok-store` and `rok-core` agree on one row shape.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of one idempotency-key record.
///
/// The integer codes are the persisted `status_id` values and MUST NOT be
/// renumbered — rows written by older builds are read back by newer ones.
///
/// `Initial` is the pre-insertion state only: a persisted row always carries
/// one of the other four statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Initial,
    Running,
    FailedRetryable,
    FailedNonRetryable,
    Completed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Initial => "INITIAL",
            RunStatus::Running => "RUNNING",
            RunStatus::FailedRetryable => "FAILED_RETRYABLE",
            RunStatus::FailedNonRetryable => "FAILED_NON_RETRYABLE",
            RunStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "INITIAL" => Ok(RunStatus::Initial),
            "RUNNING" => Ok(RunStatus::Running),
            "FAILED_RETRYABLE" => Ok(RunStatus::FailedRetryable),
            "FAILED_NON_RETRYABLE" => Ok(RunStatus::FailedNonRetryable),
            "COMPLETED" => Ok(RunStatus::Completed),
            other => Err(anyhow!("invalid run status: {}", other)),
        }
    }

    /// Persisted integer code (`status_id` column).
    pub fn status_id(&self) -> i32 {
        match self {
            RunStatus::Initial => 0,
            RunStatus::Running => 1,
            RunStatus::FailedRetryable => 2,
            RunStatus::FailedNonRetryable => 3,
            RunStatus::Completed => 4,
        }
    }

    pub fn from_status_id(id: i32) -> Result<Self> {
        match id {
            0 => Ok(RunStatus::Initial),
            1 => Ok(RunStatus::Running),
            2 => Ok(RunStatus::FailedRetryable),
            3 => Ok(RunStatus::FailedNonRetryable),
            4 => Ok(RunStatus::Completed),
            other => Err(anyhow!("invalid status_id: {}", other)),
        }
    }

    /// Returns `true` if no further transitions are possible.
    ///
    /// `FailedRetryable` is deliberately NOT terminal: it is re-entered via a
    /// claim by the next attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedNonRetryable)
    }

    /// Returns `true` if a subsequent attempt may claim this record and
    /// re-enter the handler (`FailedRetryable` always; `Running` only once its
    /// lease has expired — lease arithmetic lives in the coordinator).
    pub fn is_reentrant(&self) -> bool {
        matches!(self, Self::FailedRetryable | Self::Running)
    }
}

/// One durable row per idempotency key.
///
/// Invariants (enforced by the store operations, relied on everywhere):
/// - `status == Completed` ⇒ `response` and `finished_at` are present.
/// - `status ∈ {FailedRetryable, FailedNonRetryable}` ⇒ `finished_at` is
///   present and `response` is absent.
/// - `status == Running` ⇒ `started_at` is the lease start; `response` absent.
/// - `request` is written at most once, by the first successful insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Caller-chosen idempotency key (primary key, `id` column).
    pub key: String,
    /// Most recent transition into `Running`.
    pub started_at: DateTime<Utc>,
    /// Most recent terminal transition; `None` while `Running`.
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Serialized preprocessed input; persistent requests only.
    pub request: Option<String>,
    /// Serialized successful result; present iff `Completed`.
    pub response: Option<String>,
}

/// Insert payload for a fresh record. The store stamps `started_at` from its
/// own clock and forces `status = Running`.
#[derive(Debug, Clone)]
pub struct NewRunRecord {
    pub key: String,
    pub request: Option<String>,
}
