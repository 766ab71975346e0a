use super::{Chain, SERVER_HEADER_KEY, SERVER_HEADER_VALUE, header_keys};
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use std::sync::Arc;
use tonic::{
    codegen::http::{HeaderMap, HeaderName, HeaderValue, Request, Response},
    server::NamedService,
};
use tower::{Layer, Service};

/// Hooks invoked around every incoming call.
///
/// `method` is the gRPC path, e.g. `/farm.Farm/GetRecord`.
pub trait ServerInterceptor: Send + Sync + 'static {
    /// Runs once with the client's request headers before the call is
    /// handled. Read-only.
    fn on_call(&self, _method: &str, _headers: &HeaderMap) {}

    /// Runs once before the response headers are sent. May add headers.
    fn on_send_headers(&self, _method: &str, _headers: &mut HeaderMap) {}
}

pub type ServerChain = Chain<dyn ServerInterceptor>;

impl ServerChain {
    /// Appends `interceptor` as the new innermost link.
    pub fn with<T: ServerInterceptor>(self, interceptor: T) -> Self {
        self.push_arc(Arc::new(interceptor))
    }

    /// The default server pipeline: a single [`HeaderServerInterceptor`].
    pub fn headers() -> Self {
        Self::new().with(HeaderServerInterceptor::default())
    }
}

/// Logs the header keys sent by the client and injects a fixed metadata entry
/// into every response.
#[derive(Clone, Debug)]
pub struct HeaderServerInterceptor {
    key: HeaderName,
    value: HeaderValue,
}

impl HeaderServerInterceptor {
    pub fn new(key: HeaderName, value: HeaderValue) -> Self {
        Self { key, value }
    }
}

impl Default for HeaderServerInterceptor {
    fn default() -> Self {
        Self::new(
            HeaderName::from_static(SERVER_HEADER_KEY),
            HeaderValue::from_static(SERVER_HEADER_VALUE),
        )
    }
}

impl ServerInterceptor for HeaderServerInterceptor {
    fn on_call(&self, method: &str, headers: &HeaderMap) {
        tracing::info!(
            method,
            keys = ?header_keys(headers),
            "Header keys received from client"
        );
    }

    fn on_send_headers(&self, _method: &str, headers: &mut HeaderMap) {
        headers.insert(self.key.clone(), self.value.clone());
    }
}

/// Installs a [`ServerChain`] around one gRPC service.
///
/// The wrapped service keeps its [`NamedService::NAME`], so it can be added
/// to a `tonic` router in place of the bare service.
#[derive(Clone, Debug)]
pub struct ServerInterceptorLayer {
    chain: Arc<ServerChain>,
}

impl ServerInterceptorLayer {
    pub fn new(chain: ServerChain) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }
}

impl<S> Layer<S> for ServerInterceptorLayer {
    type Service = ServerInterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerInterceptorService {
            inner,
            chain: Arc::clone(&self.chain),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerInterceptorService<S> {
    inner: S,
    chain: Arc<ServerChain>,
}

impl<S> ServerInterceptorService<S> {
    pub fn new(inner: S, chain: ServerChain) -> Self {
        ServerInterceptorLayer::new(chain).layer(inner)
    }
}

impl<S: NamedService> NamedService for ServerInterceptorService<S> {
    const NAME: &'static str = S::NAME;
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ServerInterceptorService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_owned();
        for interceptor in self.chain.outer_to_inner() {
            interceptor.on_call(&method, req.headers());
        }

        let chain = Arc::clone(&self.chain);
        let fut = self.inner.call(req);

        Box::pin(async move {
            // Response headers go out when the response is returned to the
            // transport; payload and trailers live in the body.
            let mut response = fut.await?;
            for interceptor in chain.inner_to_outer() {
                interceptor.on_send_headers(&method, response.headers_mut());
            }
            Ok(response)
        })
    }
}
