mod common;

use axum::http::{Method, StatusCode};
use common::*;
use sso_gateway::models::{Resource, Service};
use sso_gateway::registry::{spawn_refresher, LookupError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_lookups_are_served_from_memory() {
    let app = TestApp::new(bank_registry("http://bank.internal:8080")).await;
    assert_eq!(app.store.registry_fetch_count(), 1);

    let first = app
        .state
        .registry
        .lookup("bank", "/getAccounts", &Method::GET)
        .unwrap();
    for _ in 0..100 {
        let again = app
            .state
            .registry
            .lookup("bank", "/getAccounts", &Method::GET)
            .unwrap();
        assert_eq!(again, first);
    }

    assert_eq!(app.store.registry_fetch_count(), 1);
    assert!(first.required_roles.contains("bank_read"));
    assert_eq!(first.service.service_name, "bank");
}

#[tokio::test]
async fn test_failed_refresh_keeps_serving_previous_snapshot() {
    let app = TestApp::new(bank_registry("http://bank.internal:8080")).await;
    let before = app
        .state
        .registry
        .lookup("bank", "/getAccounts", &Method::GET)
        .unwrap();

    app.store.set_registry_unavailable(true);
    assert!(app.state.registry.refresh().await.is_err());
    assert!(app.state.registry.refresh().await.is_err());

    let after = app
        .state
        .registry
        .lookup("bank", "/getAccounts", &Method::GET)
        .unwrap();
    assert_eq!(after, before);

    let status = app.state.registry.status();
    assert!(status.warm);
    assert_eq!(status.version, Some(1));
    assert_eq!(status.consecutive_failures, 2);
    assert!(status.last_error.is_some());

    app.store.set_registry_unavailable(false);
    assert_eq!(app.state.registry.refresh().await.unwrap(), 2);
    assert_eq!(app.state.registry.status().consecutive_failures, 0);
}

#[tokio::test]
async fn test_inconsistent_registry_is_rejected_whole() {
    let app = TestApp::new(bank_registry("http://bank.internal:8080")).await;

    let mut broken = bank_registry("http://bank.internal:8080");
    let orphan = Service::new("ghost", "http://ghost.internal");
    broken
        .resources
        .push(Resource::new(orphan.service_id, "x", "GET", &[]));
    app.store.set_registry(broken);

    assert!(app.state.registry.refresh().await.is_err());
    assert_eq!(app.state.registry.status().version, Some(1));
    assert!(app
        .state
        .registry
        .lookup("bank", "/getAccounts", &Method::GET)
        .is_ok());
}

#[tokio::test]
async fn test_refresh_picks_up_new_resources() {
    let downstream = spawn_downstream().await;
    let app = TestApp::new(bank_registry(&downstream.base_url())).await;
    let creds = app.issue("user_123", &["bank_read"]).await;
    let cookie = cookie_header(Some(&creds.access_token), None);

    let response = app.get("/bank/statements/2024", Some(cookie.clone())).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let mut data = bank_registry(&downstream.base_url());
    let bank_id = data.services[0].service_id;
    data.resources
        .push(Resource::new(bank_id, "statements/{year}", "GET", &["bank_read"]));
    app.store.set_registry(data);
    app.state.registry.refresh().await.unwrap();

    let response = app.get("/bank/statements/2024", Some(cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cold_cache_reports_unavailable() {
    let app = TestApp::cold(bank_registry("http://bank.internal:8080"));
    app.store.set_registry_unavailable(true);

    assert!(app.state.registry.refresh().await.is_err());
    assert!(matches!(
        app.state.registry.lookup("bank", "/getAccounts", &Method::GET),
        Err(LookupError::Unavailable)
    ));
    assert!(!app.state.registry.status().warm);
}

#[tokio::test]
async fn test_refresher_warms_cold_cache() {
    let app = TestApp::cold(bank_registry("http://bank.internal:8080"));
    let shutdown = CancellationToken::new();

    let handle = spawn_refresher(
        app.state.registry.clone(),
        Duration::from_millis(50),
        shutdown.clone(),
    );

    tokio::time::timeout(Duration::from_secs(2), async {
        while !app.state.registry.is_warm() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("refresher never warmed the cache");

    shutdown.cancel();
    handle.await.unwrap();
    assert!(app.store.registry_fetch_count() >= 1);
}
