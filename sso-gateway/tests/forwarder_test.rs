mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::*;
use std::time::Duration;

#[tokio::test]
async fn test_session_cookies_never_reach_downstream() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let cookie = format!(
        "theme=dark; {}; lang=en",
        cookie_header(Some(&creds.access_token), Some(&creds.refresh_token))
    );
    let response = app.get("/bank/getAccounts", Some(cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["cookie"], "theme=dark; lang=en");
}

#[tokio::test]
async fn test_request_headers_are_forwarded() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let request = Request::builder()
        .method("GET")
        .uri("/bank/getAccounts")
        .header(header::COOKIE, cookie_header(Some(&creds.access_token), None))
        .header("x-custom", "kept")
        .header("x-request-id", "req-42")
        .header("connection", "x-custom")
        .body(Body::empty())
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");

    let body = body_json(response).await;
    // Listed in Connection, so it is hop-by-hop for this request.
    assert!(body["custom"].is_null());
    assert_eq!(body["x_request_id"], "req-42");
    // The downstream gets its own Host, not the gateway's.
    assert_eq!(body["host"], downstream.addr.to_string());
}

#[tokio::test]
async fn test_request_body_streams_through() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let payload = "x".repeat(512 * 1024);
    let request = Request::builder()
        .method("PUT")
        .uri("/bank/echo/upload?name=big.bin")
        .header(header::COOKIE, cookie_header(Some(&creds.access_token), None))
        .body(Body::from(payload.clone()))
        .unwrap();

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["path"], "/echo/upload");
    assert_eq!(body["query"], "name=big.bin");
    assert_eq!(body["body_len"], payload.len());
}

#[tokio::test]
async fn test_response_body_streams_back() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let response = app
        .get(
            "/bank/stream",
            Some(cookie_header(Some(&creds.access_token), None)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body_bytes(response).await;
    assert_eq!(&bytes[..], b"chunk-0;chunk-1;chunk-2;chunk-3;chunk-4;");
}

#[tokio::test]
async fn test_long_stream_outlives_response_timeout() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    // 2s of body against a 1s downstream timeout.
    let response = app
        .get(
            "/bank/drip",
            Some(cookie_header(Some(&creds.access_token), None)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body_bytes(response).await;
    let expected: String = (0..8).map(|i| format!("drip-{};", i)).collect();
    assert_eq!(&bytes[..], expected.as_bytes());
}

#[tokio::test]
async fn test_unreachable_downstream_is_bad_gateway() {
    let dead = unused_address();
    let app = TestApp::new(bank_registry(&format!("http://{}", dead))).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let response = app
        .get(
            "/bank/getAccounts",
            Some(cookie_header(Some(&creds.access_token), None)),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_slow_downstream_is_gateway_timeout() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;

    let started = std::time::Instant::now();
    let response = app
        .get("/bank/slow", Some(cookie_header(Some(&creds.access_token), None)))
        .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(3));
    // Timeouts are not retried.
    assert_eq!(downstream.hit_count(), 1);
}

#[tokio::test]
async fn test_get_is_retried_on_connect_failure_but_post_is_not() {
    let addr = unused_address();
    let app = TestApp::new(bank_registry(&format!("http://{}", addr))).await;
    let creds = app.issue("user_123", &["bank_read", "bank_write"]).await;
    let cookie = cookie_header(Some(&creds.access_token), None);

    // Comes up after the first connect attempts have been refused.
    let late = spawn_downstream_later(addr, Duration::from_millis(100));

    let post = Request::builder()
        .method("POST")
        .uri("/bank/transfer")
        .header(header::COOKIE, cookie.clone())
        .body(Body::from(r#"{"amount":10}"#))
        .unwrap();
    let response = app.send(post).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = app.get("/bank/getAccounts", Some(cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let downstream = late.await.unwrap();
    assert_eq!(downstream.hit_count(), 1);
}
