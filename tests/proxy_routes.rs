//! `/proxy` routes driven in-process through the router.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use resilient_proxy::fetch::ReqwestTransport;
use resilient_proxy::{HttpServer, ProxyConfig};

mod common;

fn server() -> HttpServer {
    let mut config = ProxyConfig::default();
    config.fetch.retries = 1;
    config.fetch.base_delay_ms = 10;
    config.fetch.jitter = false;
    config.circuit_breaker.failure_threshold = 2;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    HttpServer::with_transport(config, Arc::new(ReqwestTransport::from_client(client)))
}

async fn send(server: &HttpServer, request: Request<Body>) -> (Response<()>, Value) {
    let response = server.router().oneshot(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (Response::from_parts(parts, ()), json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn counting_backend(status: u16, body: &'static str) -> (String, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let addr = common::start_programmable_backend(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { (status, body.to_string()) }
    })
    .await;
    (format!("http://{addr}"), calls)
}

#[tokio::test]
async fn test_swagger_route_miss_then_hit() {
    let (base, calls) = counting_backend(200, r#"{"openapi":"3.0.0","info":{"title":"svc"}}"#).await;
    let server = server();
    let uri = format!("/proxy/swagger?url={base}/openapi.json");

    let (first, body) = send(&server, get(&uri)).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache-status"], "MISS");
    assert_eq!(first.headers()["x-circuit-state"], "CLOSED");
    assert_eq!(first.headers()["x-retry-attempts"], "1");
    assert!(first.headers().contains_key("x-request-id"));
    assert_eq!(body["info"]["title"], "svc");

    let (second, _) = send(&server, get(&uri)).await;
    assert_eq!(second.headers()["x-cache-status"], "HIT");
    assert_eq!(second.headers()["x-retry-attempts"], "0");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let (third, _) = send(&server, get(&format!("{uri}&noCache=true"))).await;
    assert_eq!(third.headers()["x-cache-status"], "MISS");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_swagger_route_requires_url() {
    let server = server();
    let (response, body) = send(&server, get("/proxy/swagger")).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorType"], "VALIDATION_ERROR");
    assert!(body["suggestion"].is_string());
}

#[tokio::test]
async fn test_swagger_route_rejects_malformed_query() {
    let server = server();

    for query in ["url=http://svc-a/spec&noCache=yes", "url=http://svc-a/spec&timeout=abc"] {
        let (response, body) = send(&server, get(&format!("/proxy/swagger?{query}"))).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {query}");
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body["success"], false);
        assert_eq!(body["errorType"], "VALIDATION_ERROR");
        assert!(body["error"].as_str().unwrap().starts_with("invalid query"));
    }
}

#[tokio::test]
async fn test_request_id_is_propagated() {
    let server = server();
    let request = Request::builder()
        .uri("/proxy/health")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();

    let (response, body) = send(&server, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-123");
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_open_circuit_and_reset() {
    let (base, calls) = counting_backend(503, r#"{"error":"down"}"#).await;
    let server = server();
    let uri = format!("/proxy/swagger?url={base}/spec");

    // Two attempts reach the failure threshold.
    let (failed, body) = send(&server, get(&uri)).await;
    assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errorType"], "HTTP_ERROR");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let (rejected, body) = send(&server, get(&uri)).await;
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["errorType"], "CIRCUIT_OPEN");
    assert!(body["willRetryAt"].as_u64().is_some());
    assert!(rejected.headers().contains_key("retry-after"));
    assert_eq!(rejected.headers()["x-circuit-state"], "OPEN");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let (_, health) = send(&server, get("/proxy/health")).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["circuitBreaker"]["open"], 1);

    let (reset, body) = send(&server, post_json("/proxy/circuit/reset", json!({ "origin": base }))).await;
    assert_eq!(reset.status(), StatusCode::OK);
    assert_eq!(body["reset"], 1);

    send(&server, get(&uri)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_execute_wraps_upstream_response() {
    let (base, calls) = counting_backend(201, r#"{"id":7}"#).await;
    let server = server();

    let request = post_json(
        "/proxy/execute",
        json!({
            "url": format!("{base}/items"),
            "method": "POST",
            "headers": { "x-tenant": "acme" },
            "body": { "name": "widget" },
            "timeout": 2000,
            "retries": 0
        }),
    );
    let (response, body) = send(&server, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], 201);
    assert_eq!(body["body"]["id"], 7);
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["circuitState"], "CLOSED");
    assert!(body["duration"].is_u64());

    // Execute calls are never cached.
    send(&server, post_json("/proxy/execute", json!({ "url": format!("{base}/items") }))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_execute_rejects_bad_method() {
    let server = server();
    let (response, body) = send(
        &server,
        post_json("/proxy/execute", json!({ "url": "http://svc-a/x", "method": "TRACE" })),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body["errorType"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_invalidate_and_stats() {
    let (base, calls) = counting_backend(200, r#"{"openapi":"3.1.0"}"#).await;
    let server = server();
    let target = format!("{base}/openapi.json");
    let uri = format!("/proxy/swagger?url={target}");

    send(&server, get(&uri)).await;
    let (_, stats) = send(&server, get("/proxy/swagger/stats")).await;
    assert_eq!(stats["cache"]["size"], 1);
    assert_eq!(stats["circuitBreaker"]["closed"], 1);
    assert_eq!(stats["circuitBreaker"]["origins"][0]["origin"], base);

    let (_, body) = send(&server, post_json("/proxy/swagger/invalidate", json!({ "url": target }))).await;
    assert_eq!(body["removed"], 1);

    send(&server, get(&uri)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let clear = Request::builder()
        .method("POST")
        .uri("/proxy/swagger/invalidate")
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&server, clear).await;
    assert_eq!(body["invalidated"], "all");
    assert_eq!(body["removed"], 1);
}
