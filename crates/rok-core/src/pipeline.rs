//! Drives one decided invocation to its outcome.
//!
//! Replay short-circuits to `postprocess`. Fresh/retry runs the handler —
//! under a hard deadline when requested — then records `Completed` before
//! `postprocess` sees the response. The handler runs entirely outside any
//! store transaction; its side effects against other systems are its own
//! problem (use nested `run_once` keys for those).

use std::time::Duration;

use rok_schemas::RunStatus;
use rok_store::RecordStore;

use crate::decision::Decision;
use crate::error::RunError;
use crate::log::RunLog;
use crate::request::Request;

/// How the pipeline failed, before classification.
pub(crate) enum PipelineFailure {
    /// Handler breached the hard deadline. Always recorded retryable.
    Timeout { ttl: Duration },
    /// Handler failed while this attempt held the lease; must be classified
    /// and recorded.
    Handler(anyhow::Error),
    /// `postprocess` failed. The record is already `Completed` (or was being
    /// replayed); classified for the caller, never recorded — the next
    /// attempt replays.
    Postprocess(anyhow::Error),
    /// Store or codec machinery failed; passed through without recording.
    Fatal(RunError),
}

pub(crate) async fn run_to_completion<Req, Resp, Out>(
    store: &dyn RecordStore,
    log: &dyn RunLog,
    key: &str,
    request: &Request<Req, Resp, Out>,
    decision: Decision<Req, Resp>,
) -> Result<Out, PipelineFailure>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Out: Send + 'static,
{
    let (req, retry) = match decision {
        Decision::Replay(resp) => {
            return request
                .transform(resp, true)
                .await
                .map_err(PipelineFailure::Postprocess);
        }
        Decision::Fresh(req) => (req, false),
        Decision::Retry(req) => (req, true),
    };

    let handler_fut = request.invoke_handler(req, retry);
    let resp = match (request.ttl, request.automatic_timeout) {
        (Some(ttl), true) => match tokio::time::timeout(ttl, handler_fut).await {
            Ok(result) => result.map_err(PipelineFailure::Handler)?,
            Err(_) => return Err(PipelineFailure::Timeout { ttl }),
        },
        _ => handler_fut.await.map_err(PipelineFailure::Handler)?,
    };

    let blob = request
        .response_codec
        .encode(&resp)
        .map_err(|e| PipelineFailure::Fatal(RunError::Codec(e)))?;

    // Completion must be durable before postprocess runs: from here on the
    // operation is done and repeat invocations replay, whatever postprocess
    // does.
    store
        .finish(key, Some(blob), RunStatus::Completed)
        .await
        .map_err(|e| PipelineFailure::Fatal(RunError::Store(e)))?;
    log.finished(key);

    request
        .transform(resp, false)
        .await
        .map_err(PipelineFailure::Postprocess)
}
