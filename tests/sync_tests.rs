// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-day and range sync through the HTTP API.

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use health_sync::error::SyncErrorType;
use health_sync::models::{DataCategory, NewSyncError, Provider};
use serde_json::json;

mod common;
use common::{connect, date};

#[tokio::test]
async fn test_sync_day_stores_all_categories() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;

    let (status, body) = app
        .post_json("/api/fitbit/sync", "user-1", json!({ "date": "2024-03-05" }))
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["date"], "2024-03-05");
    assert_eq!(body["record"]["steps"], 8005);
    assert_eq!(body["record"]["restingHeartRate"], 58);
    assert_eq!(body["record"]["sleepHours"], 7.5);
    assert_eq!(body["record"]["weightKg"], 70.2);
    assert_eq!(body["categories"].as_array().unwrap().len(), 4);
    assert!(body["categories"]
        .as_array()
        .unwrap()
        .iter()
        .all(|c| c["success"] == true && c["attempts"] == 1));
}

#[tokio::test]
async fn test_sync_same_day_twice_is_idempotent() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    let day = date("2024-03-05");

    let first = app.state.sync.sync_day("user-1", Provider::Fitbit, day).await.unwrap();
    let second = app.state.sync.sync_day("user-1", Provider::Fitbit, day).await.unwrap();

    assert_eq!(
        app.state.db.count_daily_records("user-1", Provider::Fitbit).await.unwrap(),
        1
    );
    assert_eq!(first.record.metrics, second.record.metrics);
}

#[tokio::test]
async fn test_partial_failure_keeps_other_categories() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.fitbit.fail_category(DataCategory::Sleep);
    let day = date("2024-03-05");

    let outcome = app.state.sync.sync_day("user-1", Provider::Fitbit, day).await.unwrap();

    assert!(outcome.is_partial());
    assert_eq!(outcome.record.metrics.steps, Some(8005));
    assert_eq!(outcome.record.metrics.sleep_hours, None);

    let sleep = outcome
        .categories
        .iter()
        .find(|c| c.category == DataCategory::Sleep)
        .unwrap();
    assert!(!sleep.success);
    assert_eq!(sleep.attempts, 3);

    // The failure is logged with its category and retry count.
    let errors = app
        .state
        .errors
        .list("user-1", Some(Provider::Fitbit), 1)
        .await
        .unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, Some(DataCategory::Sleep));
    assert_eq!(errors[0].retry_count, 2);
    assert_eq!(errors[0].date, day);
}

#[tokio::test]
async fn test_resync_overwrites_with_fresh_values() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    let day = date("2024-03-05");

    app.state.sync.sync_day("user-1", Provider::Fitbit, day).await.unwrap();
    app.fitbit.fail_category(DataCategory::HeartRate);
    let outcome = app.state.sync.sync_day("user-1", Provider::Fitbit, day).await.unwrap();

    assert!(outcome.is_partial());
    let stored = app
        .state
        .db
        .get_daily_record("user-1", Provider::Fitbit, day)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.metrics.steps, Some(8005));
    assert_eq!(stored.metrics.sleep_hours, Some(7.5));
    // The failed category does not carry over the earlier value.
    assert_eq!(stored.metrics.resting_heart_rate, None);
    assert_eq!(outcome.record.metrics.resting_heart_rate, None);
    assert_eq!(
        app.state.db.count_daily_records("user-1", Provider::Fitbit).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_all_categories_failing_fails_the_day() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.fitbit.fail_date(date("2024-03-05"));

    let (status, body) = app
        .post_json("/api/fitbit/sync", "user-1", json!({ "date": "2024-03-05" }))
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["errorType"], "SERVER_ERROR");
    assert_eq!(
        app.state.db.count_daily_records("user-1", Provider::Fitbit).await.unwrap(),
        0
    );
    // One request per attempt per category.
    assert_eq!(app.fitbit.fetches(), 12);
}

#[tokio::test]
async fn test_sync_without_connection() {
    let app = common::create_test_app().await;

    let (status, body) = app
        .post_json("/api/fitbit/sync", "user-1", json!({ "date": "2024-03-05" }))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_connected");
    assert_eq!(app.fitbit.fetches(), 0);
}

#[tokio::test]
async fn test_sync_rejects_bad_date() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;

    for bad in ["2024-3-5", "2024-02-30", "yesterday"] {
        let (status, _) = app
            .post_json("/api/fitbit/sync", "user-1", json!({ "date": bad }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "date {}", bad);
    }
    assert_eq!(app.fitbit.fetches(), 0);
}

#[tokio::test]
async fn test_health_planet_range_sync() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::HealthPlanet, Duration::hours(2)).await;

    let (status, body) = app
        .post_json(
            "/api/healthplanet/sync-range",
            "user-1",
            json!({ "startDate": "2024-03-01", "endDate": "2024-03-07" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["daysSynced"], 7);
    assert_eq!(app.health_planet.fetches(), 1);

    let (status, body) = app
        .get(
            "/api/healthplanet/records?startDate=2024-03-01&endDate=2024-03-31",
            "user-1",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 7);
    assert_eq!(records[0]["date"], "2024-03-01");
    assert_eq!(records[6]["date"], "2024-03-07");
    assert_eq!(records[0]["muscleMassKg"], 48.3);
}

#[tokio::test]
async fn test_range_sync_reports_clamped_window() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::HealthPlanet, Duration::hours(2)).await;

    let (status, body) = app
        .post_json(
            "/api/healthplanet/sync-range",
            "user-1",
            json!({ "startDate": "2024-01-01", "endDate": "2024-12-31" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["startDate"], "2024-10-02");
    assert_eq!(body["endDate"], "2024-12-31");
    assert_eq!(body["daysSynced"], 91);
    assert_eq!(
        app.state
            .db
            .count_daily_records("user-1", Provider::HealthPlanet)
            .await
            .unwrap(),
        91
    );
}

#[tokio::test]
async fn test_range_sync_only_for_health_planet() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;

    let (status, _) = app
        .post_json(
            "/api/fitbit/sync-range",
            "user-1",
            json!({ "startDate": "2024-03-01", "endDate": "2024-03-07" }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_records_range_limits() {
    let app = common::create_test_app().await;

    let (status, _) = app
        .get(
            "/api/fitbit/records?startDate=2024-03-10&endDate=2024-03-01",
            "user-1",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .get(
            "/api/fitbit/records?startDate=2023-01-01&endDate=2024-03-01",
            "user-1",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_records_are_scoped_to_user() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.state
        .sync
        .sync_day("user-1", Provider::Fitbit, date("2024-03-05"))
        .await
        .unwrap();

    let (status, body) = app
        .get(
            "/api/fitbit/records?startDate=2024-03-01&endDate=2024-03-31",
            "user-2",
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["records"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_status_reports_last_sync() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.state
        .sync
        .sync_day("user-1", Provider::Fitbit, date("2024-03-05"))
        .await
        .unwrap();

    let (status, body) = app.get("/api/fitbit/status", "user-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
    assert_eq!(body["expired"], false);
    assert!(body["expiresAt"].is_string());
    assert!(body["lastSyncAt"].is_string());
}

#[tokio::test]
async fn test_disconnect_keeps_records() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.state
        .sync
        .sync_day("user-1", Provider::Fitbit, date("2024-03-05"))
        .await
        .unwrap();

    let (status, body) = app
        .post_json("/api/fitbit/disconnect", "user-1", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnected"], true);
    assert_eq!(
        app.fitbit
            .revoke_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    let (_, status_body) = app.get("/api/fitbit/status", "user-1").await;
    assert_eq!(status_body["connected"], false);
    assert_eq!(
        app.state.db.count_daily_records("user-1", Provider::Fitbit).await.unwrap(),
        1
    );

    // Disconnecting again is harmless.
    let (status, body) = app
        .post_json("/api/fitbit/disconnect", "user-1", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnected"], false);
}

#[tokio::test]
async fn test_sync_error_log_endpoints() {
    let app = common::create_test_app().await;
    connect(&app.state, "user-1", Provider::Fitbit, Duration::hours(2)).await;
    app.fitbit.fail_category(DataCategory::HeartRate);
    app.state
        .sync
        .sync_day("user-1", Provider::Fitbit, date("2024-03-05"))
        .await
        .unwrap();

    let (status, body) = app.get("/api/fitbit/sync-errors?days=7", "user-1").await;
    assert_eq!(status, StatusCode::OK);
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["errorType"], "SERVER_ERROR");
    assert_eq!(errors[0]["category"], "heart_rate");

    // Errors are per provider.
    let (_, body) = app.get("/api/healthplanet/sync-errors", "user-1").await;
    assert!(body["errors"].as_array().unwrap().is_empty());

    let (status, _) = app.get("/api/fitbit/sync-errors?days=0", "user-1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Only entries older than the cutoff are purged.
    app.state
        .db
        .insert_sync_error(&NewSyncError {
            user_id: "user-1".to_string(),
            provider: Provider::Fitbit,
            date: date("2024-01-05"),
            category: Some(DataCategory::Sleep),
            error_type: SyncErrorType::RateLimited,
            error_message: "HTTP 429 Too Many Requests".to_string(),
            occurred_at: Utc::now() - Duration::days(45),
            retry_count: 2,
        })
        .await
        .unwrap();

    let (status, body) = app
        .delete_json("/api/fitbit/sync-errors", "user-1", json!({ "days": 30 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 1);

    let (_, body) = app.get("/api/fitbit/sync-errors?days=365", "user-1").await;
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}
