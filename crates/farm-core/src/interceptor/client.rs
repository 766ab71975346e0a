use super::{CLIENT_HEADER_KEY, CLIENT_HEADER_VALUE, Chain, header_keys};
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use std::sync::Arc;
use tonic::codegen::http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use tower::{Layer, Service};

/// Hooks invoked around every outgoing call.
///
/// `method` is the gRPC path, e.g. `/farm.Farm/GetRecord`.
pub trait ClientInterceptor: Send + Sync + 'static {
    /// Runs once before the call is dispatched. May add request headers.
    fn on_start(&self, _method: &str, _headers: &mut HeaderMap) {}

    /// Runs once when the server's response headers arrive. Read-only.
    fn on_headers(&self, _method: &str, _headers: &HeaderMap) {}
}

pub type ClientChain = Chain<dyn ClientInterceptor>;

impl ClientChain {
    /// Appends `interceptor` as the new innermost link.
    pub fn with<T: ClientInterceptor>(self, interceptor: T) -> Self {
        self.push_arc(Arc::new(interceptor))
    }

    /// The default client pipeline: a single [`HeaderClientInterceptor`].
    pub fn headers() -> Self {
        Self::new().with(HeaderClientInterceptor::default())
    }
}

/// Injects a fixed metadata entry into every outgoing call and logs the
/// header keys returned by the server.
#[derive(Clone, Debug)]
pub struct HeaderClientInterceptor {
    key: HeaderName,
    value: HeaderValue,
}

impl HeaderClientInterceptor {
    pub fn new(key: HeaderName, value: HeaderValue) -> Self {
        Self { key, value }
    }
}

impl Default for HeaderClientInterceptor {
    fn default() -> Self {
        Self::new(
            HeaderName::from_static(CLIENT_HEADER_KEY),
            HeaderValue::from_static(CLIENT_HEADER_VALUE),
        )
    }
}

impl ClientInterceptor for HeaderClientInterceptor {
    fn on_start(&self, _method: &str, headers: &mut HeaderMap) {
        // `insert` replaces, so the entry is present exactly once.
        headers.insert(self.key.clone(), self.value.clone());
    }

    fn on_headers(&self, method: &str, headers: &HeaderMap) {
        tracing::info!(
            method,
            keys = ?header_keys(headers),
            "Header keys received from server"
        );
    }
}

/// Installs a [`ClientChain`] around a client transport such as
/// `tonic::transport::Channel`.
#[derive(Clone, Debug)]
pub struct ClientInterceptorLayer {
    chain: Arc<ClientChain>,
}

impl ClientInterceptorLayer {
    pub fn new(chain: ClientChain) -> Self {
        Self {
            chain: Arc::new(chain),
        }
    }
}

impl<S> Layer<S> for ClientInterceptorLayer {
    type Service = ClientInterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientInterceptorService {
            inner,
            chain: Arc::clone(&self.chain),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientInterceptorService<S> {
    inner: S,
    chain: Arc<ClientChain>,
}

impl<S> ClientInterceptorService<S> {
    pub fn new(inner: S, chain: ClientChain) -> Self {
        ClientInterceptorLayer::new(chain).layer(inner)
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ClientInterceptorService<S>
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

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_owned();
        for interceptor in self.chain.outer_to_inner() {
            interceptor.on_start(&method, req.headers_mut());
        }

        let chain = Arc::clone(&self.chain);
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await?;
            for interceptor in chain.inner_to_outer() {
                interceptor.on_headers(&method, response.headers());
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use std::sync::Mutex;
    use tower::{ServiceExt, service_fn};

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ClientInterceptor for Recorder {
        fn on_start(&self, _method: &str, _headers: &mut HeaderMap) {
            self.log.lock().unwrap().push(format!("start:{}", self.name));
        }

        fn on_headers(&self, _method: &str, _headers: &HeaderMap) {
            self.log.lock().unwrap().push(format!("headers:{}", self.name));
        }
    }

    /// Echoes the request headers back as the response body.
    async fn echo_headers(req: Request<()>) -> Result<Response<HeaderMap>, Infallible> {
        let mut response = Response::new(req.headers().clone());
        response
            .headers_mut()
            .insert("server-metadata", HeaderValue::from_static("x"));
        Ok(response)
    }

    fn request(path: &str) -> Request<()> {
        Request::builder().uri(path).body(()).unwrap()
    }

    #[tokio::test]
    async fn injects_client_header_exactly_once_for_every_method() {
        let svc = ClientInterceptorService::new(service_fn(echo_headers), ClientChain::headers());

        for path in [
            "/farm.Farm/GetRecord",
            "/farm.Farm/ListRecords",
            "/farm.Farm/ListRecordsBySmallWrapper",
            "/farm.Farm/Summarize",
            "/farm.Farm/Chat",
        ] {
            let mut req = request(path);
            // A stale value from a caller must not produce a duplicate entry.
            req.headers_mut()
                .append(CLIENT_HEADER_KEY, HeaderValue::from_static("stale"));

            let response = svc.clone().oneshot(req).await.unwrap();
            let values: Vec<_> = response.body().get_all(CLIENT_HEADER_KEY).iter().collect();
            assert_eq!(values, vec![CLIENT_HEADER_VALUE]);
        }
    }

    #[tokio::test]
    async fn response_headers_pass_through_unchanged() {
        let svc = ClientInterceptorService::new(service_fn(echo_headers), ClientChain::headers());
        let response = svc.oneshot(request("/farm.Farm/GetRecord")).await.unwrap();
        assert_eq!(response.headers().len(), 1);
        assert_eq!(response.headers()["server-metadata"], "x");
    }

    #[tokio::test]
    async fn chain_runs_outermost_first_on_request_and_last_on_response() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = ClientChain::new()
            .with(Recorder {
                name: "outer",
                log: Arc::clone(&log),
            })
            .with(Recorder {
                name: "inner",
                log: Arc::clone(&log),
            });
        assert_eq!(chain.len(), 2);

        let svc = ClientInterceptorService::new(service_fn(echo_headers), chain);
        svc.oneshot(request("/farm.Farm/Chat")).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            ["start:outer", "start:inner", "headers:inner", "headers:outer"]
        );
    }
}
