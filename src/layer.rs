//! Tower middleware running the decision engine in front of a service.
//!
//! - `NotModified`: answered here with an empty 304, the inner service is not called
//! - `Tagged`: the inner service runs and its successful response gets `ETag`, plus
//!   `Cache-Control` unless the inner service chose its own
//! - `Skipped` or untracked path: passed through untouched
//!
//! A [`CancellationToken`] in the request extensions is used as the request's
//! cancellation signal.

use futures::future::BoxFuture;
use http::header::{CACHE_CONTROL, ETAG};
use http::{Request, Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Layer, Service};

use crate::context::{RequestContext, ResponseHead};
use crate::handler::{RequestHandler, RequestOutcome};
use crate::routes::RouteTable;

#[derive(Clone)]
pub struct TrackLayer {
    handler: Arc<RequestHandler>,
    routes: Arc<RouteTable>,
}

impl TrackLayer {
    pub fn new(handler: Arc<RequestHandler>, routes: Arc<RouteTable>) -> Self {
        Self { handler, routes }
    }
}

impl<S> Layer<S> for TrackLayer {
    type Service = TrackService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrackService {
            inner,
            handler: Arc::clone(&self.handler),
            routes: Arc::clone(&self.routes),
        }
    }
}

#[derive(Clone)]
pub struct TrackService<S> {
    inner: S,
    handler: Arc<RequestHandler>,
    routes: Arc<RouteTable>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for TrackService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // the clone is not ready; keep the driven service for this call
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let handler = Arc::clone(&self.handler);
        let routes = Arc::clone(&self.routes);

        Box::pin(track(inner, handler, routes, request))
    }
}

async fn track<S, ReqBody, ResBody>(
    mut inner: S,
    handler: Arc<RequestHandler>,
    routes: Arc<RouteTable>,
    request: Request<ReqBody>,
) -> Result<Response<ResBody>, BoxError>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: Default,
{
    let Some(options) = routes.lookup(request.uri().path()).cloned() else {
        return inner.call(request).await.map_err(Into::into);
    };

    let cancel = request
        .extensions()
        .get::<CancellationToken>()
        .cloned()
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    let mut head = ResponseHead::new();
    let outcome = {
        let ctx = RequestContext::from_parts(&parts);
        handler.handle(&ctx, &mut head, &options, &cancel).await?
    };
    let request = Request::from_parts(parts, body);

    match outcome {
        RequestOutcome::NotModified => {
            let mut response = Response::new(ResBody::default());
            *response.status_mut() = head.status;
            Ok(response)
        }
        RequestOutcome::Skipped => inner.call(request).await.map_err(Into::into),
        RequestOutcome::Tagged => {
            let mut response = inner.call(request).await.map_err(Into::<BoxError>::into)?;
            if response.status().is_success() && !response.headers().contains_key(ETAG) {
                let headers = response.headers_mut();
                if let Some(etag) = head.headers.remove(ETAG) {
                    headers.insert(ETAG, etag);
                }
                if !headers.contains_key(CACHE_CONTROL) {
                    if let Some(cache_control) = head.headers.remove(CACHE_CONTROL) {
                        headers.insert(CACHE_CONTROL, cache_control);
                    }
                }
            }
            Ok(response)
        }
    }
}
