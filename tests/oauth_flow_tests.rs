// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth connect flow tests.
//!
//! These tests verify that:
//! 1. The connect URL carries a signed state and our callback URL
//! 2. The callback stores a credential and redirects with the outcome
//! 3. States and manually entered codes are single-use

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use health_sync::models::Provider;
use serde_json::json;
use std::sync::atomic::Ordering;
use tower::ServiceExt;

mod common;
use common::TestApp;

/// Hit the callback and return the redirect location.
async fn callback(app: &TestApp, provider: &str, query: &str) -> String {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/{}/callback?{}", provider, query))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_connect_url() {
    let app = common::create_test_app().await;

    let (status, body) = app.get("/api/fitbit/connect-url", "user-1").await;

    assert_eq!(status, StatusCode::OK);
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("https://provider.test/fitbit/authorize"));
    assert!(url.contains("state="));
    assert!(url.contains(&*urlencoding::encode(
        "http://localhost:8080/api/fitbit/callback"
    )));
}

#[tokio::test]
async fn test_callback_connects_provider() {
    let app = common::create_test_app().await;
    let state = app
        .state
        .oauth
        .issue("user-1", Provider::Fitbit, Utc::now())
        .unwrap();

    let location = callback(
        &app,
        "fitbit",
        &format!("code=abc&state={}", urlencoding::encode(&state)),
    )
    .await;

    assert_eq!(
        location,
        "http://localhost:5173/integrations?provider=fitbit&status=success"
    );
    let stored = app
        .state
        .tokens
        .store()
        .get_credential("user-1", Provider::Fitbit)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "access-abc");
    assert_eq!(stored.provider_user_id.as_deref(), Some("ABC123"));
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let app = common::create_test_app().await;
    let state = app
        .state
        .oauth
        .issue("user-1", Provider::Fitbit, Utc::now())
        .unwrap();
    let query = format!("code=abc&state={}", urlencoding::encode(&state));

    callback(&app, "fitbit", &query).await;
    let location = callback(&app, "fitbit", &query).await;

    assert!(location.contains("status=error"));
    assert!(location.contains("reason=state_already_used"));
    assert_eq!(app.fitbit.exchange_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_callback_rejects_bad_states() {
    let app = common::create_test_app().await;
    let expired = app
        .state
        .oauth
        .issue("user-1", Provider::Fitbit, Utc::now() - Duration::minutes(11))
        .unwrap();
    let for_fitbit = app
        .state
        .oauth
        .issue("user-1", Provider::Fitbit, Utc::now())
        .unwrap();

    let cases = [
        ("fitbit", "code=abc".to_string(), "missing_state"),
        ("fitbit", "state=xyz".to_string(), "missing_code"),
        ("fitbit", "error=access_denied".to_string(), "access_denied"),
        ("fitbit", "code=abc&state=bm90LWEtc3RhdGU".to_string(), "invalid_state"),
        (
            "fitbit",
            format!("code=abc&state={}", urlencoding::encode(&expired)),
            "expired_state",
        ),
        (
            "healthplanet",
            format!("code=abc&state={}", urlencoding::encode(&for_fitbit)),
            "provider_mismatch",
        ),
        ("garmin", "code=abc&state=xyz".to_string(), "unknown_provider"),
    ];

    for (provider, query, reason) in cases {
        let location = callback(&app, provider, &query).await;
        assert!(
            location.ends_with(&format!("status=error&reason={}", reason)),
            "{} -> {}",
            query,
            location
        );
    }
    assert_eq!(app.fitbit.exchange_calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.health_planet.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_callback_exchange_failure() {
    let app = common::create_test_app().await;
    let state = app
        .state
        .oauth
        .issue("user-1", Provider::HealthPlanet, Utc::now())
        .unwrap();

    let location = callback(
        &app,
        "healthplanet",
        &format!("code=bad-code&state={}", urlencoding::encode(&state)),
    )
    .await;

    assert!(location.ends_with("status=error&reason=token_exchange_failed"));
}

#[tokio::test]
async fn test_manual_code_is_single_use() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .post_json("/api/healthplanet/code", "user-1", json!({ "code": "xyz" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["connected"], true);
    assert!(body["expiresAt"].is_string());

    let (status, body) = app
        .post_json("/api/healthplanet/code", "user-1", json!({ "code": "xyz" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
    assert_eq!(
        app.health_planet.exchange_calls.load(Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn test_manual_code_validation() {
    let app = common::create_test_app().await;

    let (status, _) = app
        .post_json("/api/fitbit/code", "user-1", json!({ "code": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post_json("/api/fitbit/code", "user-1", json!({ "code": "c".repeat(600) }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(app.fitbit.exchange_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_manual_code_exchange_failure() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .post_json("/api/fitbit/code", "user-1", json!({ "code": "bad-code" }))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["errorType"], "CLIENT_ERROR");
    let (_, status_body) = app.get("/api/fitbit/status", "user-1").await;
    assert_eq!(status_body["connected"], false);
}
