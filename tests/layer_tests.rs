use http::header::{CACHE_CONTROL, ETAG, IF_NONE_MATCH};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::{service_fn, Layer, ServiceExt};

use etag_tracker::{
    Epoch, MemorySource, ProviderRegistry, ProviderResolver, RequestHandler, RouteTable,
    SourceProvider, TagCodec, TrackLayer, TrackOptions,
};

const EPOCH: &str = "1700000000000000";

struct Harness {
    layer: TrackLayer,
    source: Arc<MemorySource>,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let source = Arc::new(MemorySource::with_keys("main", ["roles", "users"]));
        let registry = ProviderRegistry::builder()
            .register(Arc::clone(&source) as Arc<dyn SourceProvider>)
            .build()
            .unwrap();
        let handler = RequestHandler::new(
            TagCodec::new(Epoch::new(EPOCH).unwrap()),
            ProviderResolver::new(Arc::new(registry)),
        );
        let routes = RouteTable::builder()
            .route("/roles", TrackOptions::builder().key("roles").build().unwrap())
            .route(
                "/dashboard",
                TrackOptions::builder().keys(["roles", "users"]).build().unwrap(),
            )
            .route("/private", TrackOptions::builder().key("roles").build().unwrap())
            .route(
                "/broken",
                TrackOptions::builder().provider_id("replica").build().unwrap(),
            )
            .build()
            .unwrap();

        Self {
            layer: TrackLayer::new(Arc::new(handler), Arc::new(routes)),
            source,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn send(&self, request: Request<String>) -> Result<Response<String>, tower::BoxError> {
        let calls = Arc::clone(&self.calls);
        let inner = service_fn(move |request: Request<String>| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let status = if request.uri().path() == "/missing" {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::OK
                };
                let mut response = Response::new(format!("body for {}", request.uri().path()));
                *response.status_mut() = status;
                if request.uri().path() == "/private" {
                    response
                        .headers_mut()
                        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                }
                Ok::<_, Infallible>(response)
            }
        });

        self.layer.layer(inner).oneshot(request).await
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn get(path: &str) -> Request<String> {
    Request::get(path).body(String::new()).unwrap()
}

#[tokio::test]
async fn test_first_request_is_tagged() {
    let harness = Harness::new();
    harness.source.set_version("roles", 5);

    let response = harness.send(get("/roles")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ETAG], format!("{}-5", EPOCH).as_str());
    assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
    assert_eq!(response.body(), "body for /roles");
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_inner_cache_control_is_kept() {
    let harness = Harness::new();

    let response = harness.send(get("/private")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ETAG], format!("{}-0", EPOCH).as_str());
    assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
    assert_eq!(response.headers().get_all(CACHE_CONTROL).iter().count(), 1);
}

#[tokio::test]
async fn test_matching_tag_short_circuits() {
    let harness = Harness::new();
    let first = harness.send(get("/roles")).await.unwrap();
    let tag = first.headers()[ETAG].clone();

    let request = Request::get("/roles")
        .header(IF_NONE_MATCH, tag)
        .body(String::new())
        .unwrap();
    let response = harness.send(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.body().is_empty());
    // only the first request reached the inner service
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_change_invalidates_tag() {
    let harness = Harness::new();
    let first = harness.send(get("/dashboard")).await.unwrap();
    let tag = first.headers()[ETAG].to_str().unwrap().to_string();

    harness.source.bump("users").unwrap();

    let request = Request::get("/dashboard")
        .header(IF_NONE_MATCH, tag.as_str())
        .body(String::new())
        .unwrap();
    let response = harness.send(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(response.headers()[ETAG].to_str().unwrap(), tag);
    assert_eq!(harness.calls(), 2);
}

#[tokio::test]
async fn test_untracked_and_skipped_requests_pass_through() {
    let harness = Harness::new();

    let response = harness.send(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(ETAG).is_none());

    let post = Request::builder()
        .method(Method::POST)
        .uri("/roles")
        .body(String::new())
        .unwrap();
    let response = harness.send(post).await.unwrap();
    assert!(response.headers().get(ETAG).is_none());

    let no_store = Request::get("/roles")
        .header(CACHE_CONTROL, "no-store")
        .body(String::new())
        .unwrap();
    let response = harness.send(no_store).await.unwrap();
    assert!(response.headers().get(ETAG).is_none());

    assert_eq!(harness.calls(), 3);
}

#[tokio::test]
async fn test_configuration_error_surfaces() {
    let harness = Harness::new();

    let err = harness.send(get("/broken")).await.unwrap_err();
    assert!(err.to_string().contains("replica"));
    assert_eq!(harness.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_request_never_reaches_inner() {
    let harness = Harness::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut request = get("/roles");
    request.extensions_mut().insert(cancel);

    let err = harness.send(request).await.unwrap_err();
    let err = err
        .downcast_ref::<etag_tracker::TrackerError>()
        .expect("tracker error");
    assert!(err.is_cancelled());
    assert_eq!(harness.calls(), 0);
}
