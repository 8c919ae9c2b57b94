use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stasis::cache::{CacheBackend, CacheStore, MemoryBackend};
use stasis::cache_key::derive_key;
use stasis::disk_cache::DiskBackend;
use stasis::events;
use stasis::exchange::{ActixExchange, Exchange};
use stasis::fetcher::OriginForwarder;
use stasis::lock::RequestLock;
use stasis::metrics::MetricsObserver;
use stasis::proxy::{Dispatcher, CONTROL_PATH};
use stasis::server::{dispatch, AppState};
use stasis::util::Result;

const HOSTNAME: &str = "stasis.proxy";

/// stands in for the live network; counts how often it is reached
#[derive(Default)]
struct FakeOrigin {
    calls: AtomicUsize,
}

impl OriginForwarder for FakeOrigin {
    fn forward(&self, req: Request<Bytes>) -> BoxFuture<'_, Result<Response<Bytes>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body = format!("live {}", req.uri());
        async move {
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain")
                .header("x-origin", "fake")
                .body(Bytes::from(body))
                .unwrap())
        }
        .boxed()
    }
}

fn build_dispatcher(origin: Arc<FakeOrigin>, backend: Box<dyn CacheBackend>) -> Arc<Dispatcher> {
    let (event_sender, event_receiver) = events::channel(1024);
    let metrics = Arc::new(MetricsObserver::new());
    metrics.clone().spawn(event_receiver);

    let store = Arc::new(CacheStore::new(backend, event_sender.clone()));
    Arc::new(Dispatcher::new(
        store,
        Arc::new(RequestLock::new(true)),
        metrics,
        event_sender,
        origin,
        HOSTNAME,
        "test-fingerprint",
    ))
}

fn key_of(target: &str, host: &str) -> String {
    let req = test::TestRequest::get()
        .uri(target)
        .insert_header(("host", host))
        .to_http_request();
    let exchange = ActixExchange::new(&req, Bytes::new());
    derive_key(
        exchange.host(),
        exchange.path(),
        exchange.query(),
        exchange.headers(),
        exchange.body(),
    )
}

fn set_outbound(enabled: bool) -> test::TestRequest {
    test::TestRequest::post()
        .uri(CONTROL_PATH)
        .insert_header(("host", HOSTNAME))
        .set_payload(format!("{{\"enableOutboundRequests\":{}}}", enabled))
}

fn browse(target: &str, host: &str) -> test::TestRequest {
    test::TestRequest::get()
        .uri(target)
        .insert_header(("host", host))
}

#[actix_web::test]
async fn lock_toggle_scenario() {
    let origin = Arc::new(FakeOrigin::default());
    let dispatcher = build_dispatcher(origin.clone(), Box::new(MemoryBackend::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                dispatcher: dispatcher.clone(),
            }))
            .default_service(web::to(dispatch)),
    )
    .await;

    // 1. close the gate
    let resp = test::call_service(&app, set_outbound(false).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // 2. an unseen request gets no content and leaves a placeholder behind
    let resp = test::call_service(&app, browse("/", "example.com").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 0);

    let placeholder = dispatcher
        .store()
        .read(&key_of("/", "example.com"))
        .await
        .expect("placeholder entry");
    assert_eq!(placeholder.status, StatusCode::NOT_FOUND);
    assert!(placeholder.data.is_empty());

    // 3. open it again
    let resp = test::call_service(&app, set_outbound(true).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // 4. a different request goes live and is captured
    let resp = test::call_service(&app, browse("/fresh", "example.com").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-origin").unwrap(), "fake");
    let body = test::read_body(resp).await;
    assert_eq!(body, Bytes::from("live https://example.com/fresh"));
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);

    let captured = dispatcher
        .store()
        .read(&key_of("/fresh", "example.com"))
        .await
        .expect("captured entry");
    assert_eq!(captured.data, body);
    assert_eq!(captured.url, "https://example.com/fresh");
}

#[actix_web::test]
async fn captured_responses_replay_while_locked() {
    let origin = Arc::new(FakeOrigin::default());
    let dispatcher = build_dispatcher(origin.clone(), Box::new(MemoryBackend::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                dispatcher: dispatcher.clone(),
            }))
            .default_service(web::to(dispatch)),
    )
    .await;

    let live = test::call_and_read_body(&app, browse("/app.js?v=3", "cdn.example.com").to_request()).await;

    test::call_service(&app, set_outbound(false).to_request()).await;

    let resp = test::call_service(&app, browse("/app.js?v=3", "cdn.example.com").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await, live);
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn control_path_on_another_host_is_proxied() {
    let origin = Arc::new(FakeOrigin::default());
    let dispatcher = build_dispatcher(origin.clone(), Box::new(MemoryBackend::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                dispatcher: dispatcher.clone(),
            }))
            .default_service(web::to(dispatch)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri(CONTROL_PATH)
        .insert_header(("host", "example.com"))
        .set_payload(r#"{"enableOutboundRequests":false}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(dispatcher.lock().status());
    assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
}

#[actix_web::test]
async fn metrics_endpoint_reports_over_http() {
    let origin = Arc::new(FakeOrigin::default());
    let dispatcher = build_dispatcher(origin, Box::new(MemoryBackend::new()));
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState {
                dispatcher: dispatcher.clone(),
            }))
            .default_service(web::to(dispatch)),
    )
    .await;

    for target in ["/a", "/b?x=1", "/b?x=2", "/a"] {
        test::call_service(&app, browse(target, "example.com").to_request()).await;
    }

    // the observer runs on its own task; give it a moment to catch up
    let mut report = serde_json::Value::Null;
    for _ in 0..50 {
        report = test::call_and_read_body_json(
            &app,
            browse("/__stasis/metrics?n=5", "example.com").to_request(),
        )
        .await;
        if report["totalRequests"] == 4 {
            break;
        }
        actix_web::rt::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(report["totalRequests"], 4);
    assert_eq!(report["keys"], 3);
    assert_eq!(report["hits"], 1);
    assert_eq!(report["misses"], 3);
    assert_eq!(
        report["topMissCounts"],
        serde_json::json!([
            { "url": "https://example.com/b", "misses": 2 },
            { "url": "https://example.com/a", "misses": 1 },
        ])
    );
}

#[actix_web::test]
async fn disk_cache_replays_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let origin = Arc::new(FakeOrigin::default());
        let dispatcher = build_dispatcher(origin, Box::new(DiskBackend::open(dir.path()).unwrap()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppState { dispatcher }))
                .default_service(web::to(dispatch)),
        )
        .await;
        test::call_service(&app, browse("/report", "example.com").to_request()).await;
    }

    let origin = Arc::new(FakeOrigin::default());
    let dispatcher = build_dispatcher(origin.clone(), Box::new(DiskBackend::open(dir.path()).unwrap()));
    dispatcher.lock().set_status(false);
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(AppState { dispatcher }))
            .default_service(web::to(dispatch)),
    )
    .await;

    let resp = test::call_service(&app, browse("/report", "example.com").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        test::read_body(resp).await,
        Bytes::from("live https://example.com/report")
    );
    assert_eq!(origin.calls.load(Ordering::SeqCst), 0);
}
