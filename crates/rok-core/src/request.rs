//! The per-invocation request descriptor.
//!
//! Built once per call and handed to the coordinator: how to produce the
//! input, how to run the operation, how to shape the outcome, and the lease /
//! timeout / persistence knobs. Persistence is one boolean of behavior
//! (serialize the preprocessed input or recompute it), so it is a tagged
//! variant here, not a type hierarchy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::{BlobCodec, JsonCodec};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

type PreprocessFn<Req> = Arc<dyn Fn() -> BoxFuture<anyhow::Result<Req>> + Send + Sync>;
type HandlerFn<Req, Resp> = Arc<dyn Fn(Req, bool) -> BoxFuture<anyhow::Result<Resp>> + Send + Sync>;
type PostprocessFn<Resp, Out> =
    Arc<dyn Fn(Resp, bool) -> BoxFuture<anyhow::Result<Out>> + Send + Sync>;

pub(crate) enum Persistence<Req> {
    /// `preprocess` is recomputed on every attempt; it is assumed pure or at
    /// least idempotent.
    Ephemeral,
    /// The preprocessed input is serialized on first insert and rehydrated on
    /// every retry, so each attempt sees an identical input.
    Persistent { codec: Arc<dyn BlobCodec<Req>> },
}

/// One invocation's descriptor: `preprocess → handler → postprocess` plus the
/// lease and persistence knobs.
///
/// `Req` is the handler input, `Resp` the stored operation result, `Out` the
/// caller-visible outcome of `postprocess`.
pub struct Request<Req, Resp, Out> {
    pub(crate) preprocess: PreprocessFn<Req>,
    pub(crate) handler: HandlerFn<Req, Resp>,
    pub(crate) postprocess: PostprocessFn<Resp, Out>,
    pub(crate) ttl: Option<Duration>,
    pub(crate) automatic_timeout: bool,
    pub(crate) persistence: Persistence<Req>,
    pub(crate) response_codec: Arc<dyn BlobCodec<Resp>>,
}

impl<Req, Resp, Out> Request<Req, Resp, Out>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    Out: Send + 'static,
{
    /// Descriptor with the default JSON response codec.
    ///
    /// `handler` receives `retry = true` when this attempt re-entered the key
    /// after a retryable failure or an expired lease. `postprocess` receives
    /// `already_completed = true` when the response is a replay of a prior
    /// completion.
    pub fn new<P, PFut, H, HFut, T, TFut>(preprocess: P, handler: H, postprocess: T) -> Self
    where
        Resp: Serialize + DeserializeOwned,
        P: Fn() -> PFut + Send + Sync + 'static,
        PFut: Future<Output = anyhow::Result<Req>> + Send + 'static,
        H: Fn(Req, bool) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
        T: Fn(Resp, bool) -> TFut + Send + Sync + 'static,
        TFut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        Self::with_response_codec(preprocess, handler, postprocess, JsonCodec)
    }

    /// Descriptor with a caller-supplied response codec, for `Resp` types
    /// that are not serde values.
    pub fn with_response_codec<P, PFut, H, HFut, T, TFut>(
        preprocess: P,
        handler: H,
        postprocess: T,
        response_codec: impl BlobCodec<Resp> + 'static,
    ) -> Self
    where
        P: Fn() -> PFut + Send + Sync + 'static,
        PFut: Future<Output = anyhow::Result<Req>> + Send + 'static,
        H: Fn(Req, bool) -> HFut + Send + Sync + 'static,
        HFut: Future<Output = anyhow::Result<Resp>> + Send + 'static,
        T: Fn(Resp, bool) -> TFut + Send + Sync + 'static,
        TFut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        Self {
            preprocess: Arc::new(move || -> BoxFuture<anyhow::Result<Req>> {
                Box::pin(preprocess())
            }),
            handler: Arc::new(move |req, retry| -> BoxFuture<anyhow::Result<Resp>> {
                Box::pin(handler(req, retry))
            }),
            postprocess: Arc::new(move |resp, replayed| -> BoxFuture<anyhow::Result<Out>> {
                Box::pin(postprocess(resp, replayed))
            }),
            ttl: None,
            automatic_timeout: false,
            persistence: Persistence::Ephemeral,
            response_codec: Arc::new(response_codec),
        }
    }

    /// Lease duration. While a `Running` record is younger than this, other
    /// attempts are rejected; once it is older, the key is reclaimable.
    /// Without a ttl there is no lease expiry and no hard timeout — a crashed
    /// worker wedges the key until externally repaired.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// When enabled (and a ttl is set), the handler runs under a hard
    /// deadline of the ttl; breach fails the attempt as a timeout.
    pub fn automatic_timeout(mut self, enabled: bool) -> Self {
        self.automatic_timeout = enabled;
        self
    }

    /// Persist the preprocessed input with the default JSON codec.
    pub fn persistent(mut self) -> Self
    where
        Req: Serialize + DeserializeOwned,
    {
        self.persistence = Persistence::Persistent {
            codec: Arc::new(JsonCodec),
        };
        self
    }

    /// Persist the preprocessed input with a caller-supplied codec.
    pub fn persistent_with(mut self, codec: impl BlobCodec<Req> + 'static) -> Self {
        self.persistence = Persistence::Persistent {
            codec: Arc::new(codec),
        };
        self
    }

    pub(crate) fn produce_input(&self) -> BoxFuture<anyhow::Result<Req>> {
        (*self.preprocess)()
    }

    pub(crate) fn invoke_handler(&self, req: Req, retry: bool) -> BoxFuture<anyhow::Result<Resp>> {
        (*self.handler)(req, retry)
    }

    pub(crate) fn transform(&self, resp: Resp, replayed: bool) -> BoxFuture<anyhow::Result<Out>> {
        (*self.postprocess)(resp, replayed)
    }
}
