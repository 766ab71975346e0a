//! Client-side abort of in-flight request bodies.
//!
//! Dropping the outbound half of a streaming call ends the request body
//! cleanly, which the server reads as a normal half-close. To fail the call
//! instead, attach an [`AbortSignal`] to the request extensions and install
//! [`AbortLayer`] below the client stub. Once the signal fires the request
//! body yields an error, the transport resets the HTTP/2 stream, and the
//! server's inbound stream fails.

use bytes::Bytes;
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use http_body::{Body, Frame, SizeHint};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tonic::{Status, codegen::http::Request};
use tower::{Layer, Service};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fails the request body of the call it is attached to.
///
/// Cloning yields another handle to the same signal.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Idempotent.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A request body that errors once its [`AbortSignal`] fires.
pub struct AbortableBody<B> {
    inner: B,
    signal: AbortSignal,
    aborted: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<B> AbortableBody<B> {
    pub fn new(inner: B, signal: &AbortSignal) -> Self {
        Self {
            inner,
            signal: signal.clone(),
            aborted: Box::pin(signal.token.clone().cancelled_owned()),
        }
    }
}

impl<B> Body for AbortableBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        // Checked before the inner body: nothing queued after the abort is
        // sent, and a closed inner body never turns an abort into a clean end.
        if this.aborted.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Some(Err(Status::cancelled("Call aborted by client").into())));
        }

        Pin::new(&mut this.inner)
            .poll_frame(cx)
            .map(|frame| frame.map(|result| result.map_err(Into::into)))
    }

    fn is_end_stream(&self) -> bool {
        !self.signal.is_aborted() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Installs [`AbortService`] around a client transport.
#[derive(Clone, Copy, Debug, Default)]
pub struct AbortLayer;

impl<S> Layer<S> for AbortLayer {
    type Service = AbortService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AbortService { inner }
    }
}

/// Wraps the body of every request that carries an [`AbortSignal`]
/// extension in an [`AbortableBody`]. Other requests pass through untouched.
#[derive(Clone, Debug)]
pub struct AbortService<S> {
    inner: S,
}

impl<S> AbortService<S> {
    pub fn new(inner: S) -> Self {
        AbortLayer.layer(inner)
    }
}

impl<S> Service<Request<tonic::body::Body>> for AbortService<S>
where
    S: Service<Request<tonic::body::Body>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<tonic::body::Body>) -> Self::Future {
        let request = match request.extensions().get::<AbortSignal>().cloned() {
            Some(signal) => {
                request.map(|body| tonic::body::Body::new(AbortableBody::new(body, &signal)))
            }
            None => request,
        };
        self.inner.call(request)
    }
}
