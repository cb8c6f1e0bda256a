//! Error taxonomy for one `run_once` invocation, and the transient marker
//! user handlers use to flag a failure as worth retrying.

use std::fmt;

use rok_store::StoreError;

use crate::codec::CodecError;

/// Everything `run_once` can fail with.
///
/// The variants split into three families with different store effects:
///
/// - **Arbitration rejections** — [`AlreadyRunning`][Self::AlreadyRunning],
///   [`OperationFailed`][Self::OperationFailed]: no handler ran, nothing was
///   recorded.
/// - **Classified execution failures** — [`Timeout`][Self::Timeout],
///   [`Retryable`][Self::Retryable], [`NonRetryable`][Self::NonRetryable]:
///   the failure was recorded against the key before being surfaced (except
///   when it came from `postprocess` on an already-completed record, which is
///   never rewritten).
/// - **Fatal** — [`Store`][Self::Store], [`Codec`][Self::Codec]: the
///   coordination machinery itself failed; no state transition was attempted
///   and the key may be left `Running`, to be reclaimed via lease expiry.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("idempotency key must be a non-empty string")]
    InvalidKey,

    #[error("`{key}`: another invocation holds the running lease")]
    AlreadyRunning { key: String },

    #[error("`{key}`: a previous attempt failed non-retryably; no retry will succeed")]
    OperationFailed { key: String },

    #[error("`{key}`: handler exceeded its {ttl_ms} ms deadline")]
    Timeout { key: String, ttl_ms: u64 },

    #[error("`{key}`: attempt failed retryably")]
    Retryable {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("`{key}`: attempt failed non-retryably")]
    NonRetryable {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("blob codec failure")]
    Codec(#[from] CodecError),

    #[error("record store failure")]
    Store(#[from] StoreError),
}

impl RunError {
    /// Whether the *client* may usefully retry this invocation later.
    ///
    /// `AlreadyRunning` is retryable from the client's viewpoint (the other
    /// attempt may fail retryably or its lease may expire), as are `Timeout`
    /// and `Retryable`. `OperationFailed` and `NonRetryable` never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RunError::AlreadyRunning { .. } | RunError::Timeout { .. } | RunError::Retryable { .. }
        )
    }
}

/// Marker wrapping an error to flag it as transient.
///
/// The default retryability predicate accepts exactly the errors whose chain
/// contains this marker. Handlers opt a failure into retry by returning
/// [`transient(err)`][transient]; everything else is recorded non-retryable.
#[derive(Debug)]
pub struct Transient {
    inner: anyhow::Error,
}

impl Transient {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self { inner: err.into() }
    }
}

impl fmt::Display for Transient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for Transient {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(AsRef::<dyn std::error::Error>::as_ref(&self.inner))
    }
}

/// Wrap an error in the [`Transient`] marker.
pub fn transient(err: impl Into<anyhow::Error>) -> anyhow::Error {
    anyhow::Error::new(Transient::new(err))
}

/// Default retryability predicate: the error's chain contains the
/// [`Transient`] marker.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<Transient>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn transient_marker_is_detected_at_the_root() {
        let err = transient(anyhow!("broker unavailable"));
        assert!(is_transient(&err));
    }

    #[test]
    fn transient_marker_is_detected_under_context_layers() {
        let err = transient(anyhow!("connection reset"))
            .context("submitting payment")
            .context("running order flow");
        assert!(is_transient(&err));
    }

    #[test]
    fn unmarked_errors_are_not_transient() {
        let err = anyhow!("validation failed").context("submitting payment");
        assert!(!is_transient(&err));
    }

    #[test]
    fn client_retryability_split() {
        assert!(RunError::AlreadyRunning { key: "k".into() }.is_retryable());
        assert!(RunError::Timeout { key: "k".into(), ttl_ms: 5 }.is_retryable());
        assert!(!RunError::OperationFailed { key: "k".into() }.is_retryable());
        assert!(!RunError::InvalidKey.is_retryable());
    }
}
