// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use health_sync::config::Config;
use health_sync::db::Db;
use health_sync::error::{ProviderError, SyncErrorType};
use health_sync::middleware::auth::create_jwt;
use health_sync::models::{Credential, DailyMetrics, DataCategory, Provider};
use health_sync::routes::create_router;
use health_sync::services::{ProviderApi, ProviderRegistry, TokenGrant, TokenStore};
use health_sync::services::health_planet::clamp_query_window;
use health_sync::AppState;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

const FITBIT_CATEGORIES: &[DataCategory] = &[
    DataCategory::Activity,
    DataCategory::HeartRate,
    DataCategory::Sleep,
    DataCategory::Body,
];
const HEALTH_PLANET_CATEGORIES: &[DataCategory] = &[DataCategory::BodyComposition];

/// Initial tokens seeded by [`connect`].
pub const SEED_ACCESS_TOKEN: &str = "access-0";
pub const SEED_REFRESH_TOKEN: &str = "refresh-0";

/// Scripted behaviour of a [`FakeProvider`].
#[derive(Default)]
struct Script {
    /// Every category fails with SERVER_ERROR on these dates.
    failing_dates: HashSet<NaiveDate>,
    /// These categories fail with SERVER_ERROR on every date.
    failing_categories: HashSet<DataCategory>,
    /// Access tokens answered with 401.
    rejected_tokens: HashSet<String>,
    /// Returned by the next refresh calls instead of a new grant.
    refresh_error: Option<ProviderError>,
    /// Stored right before the refresh fails, as if another instance won the race.
    race_winner: Option<(TokenStore, Credential)>,
    /// Held inside each refresh, so concurrent callers overlap.
    refresh_delay: Option<std::time::Duration>,
}

/// In-process provider with counters and scripted failures.
pub struct FakeProvider {
    provider: Provider,
    script: Mutex<Script>,
    pub refresh_calls: AtomicU32,
    pub fetch_calls: AtomicU32,
    pub exchange_calls: AtomicU32,
    pub revoke_calls: AtomicU32,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            script: Mutex::new(Script::default()),
            refresh_calls: AtomicU32::new(0),
            fetch_calls: AtomicU32::new(0),
            exchange_calls: AtomicU32::new(0),
            revoke_calls: AtomicU32::new(0),
        }
    }

    pub fn fail_date(&self, date: NaiveDate) {
        self.script.lock().unwrap().failing_dates.insert(date);
    }

    pub fn fail_category(&self, category: DataCategory) {
        self.script.lock().unwrap().failing_categories.insert(category);
    }

    pub fn reject_token(&self, token: &str) {
        self.script
            .lock()
            .unwrap()
            .rejected_tokens
            .insert(token.to_string());
    }

    pub fn fail_refresh(&self, error: ProviderError) {
        self.script.lock().unwrap().refresh_error = Some(error);
    }

    pub fn lose_refresh_race(&self, store: TokenStore, winner: Credential) {
        let mut script = self.script.lock().unwrap();
        script.refresh_error = Some(
            ProviderError::new(SyncErrorType::ClientError, "HTTP 400 Bad Request")
                .with_status(400)
                .with_body(r#"{"errors":[{"errorType":"invalid_grant"}]}"#),
        );
        script.race_winner = Some((store, winner));
    }

    pub fn slow_refresh(&self, delay: std::time::Duration) {
        self.script.lock().unwrap().refresh_delay = Some(delay);
    }

    pub fn refreshes(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn metrics_for(&self, category: DataCategory, date: NaiveDate) -> DailyMetrics {
        let day = i64::from(date.day());
        match category {
            DataCategory::Activity => DailyMetrics {
                steps: Some(8000 + day),
                calories_burned: Some(2100),
                distance_km: Some(6.2),
                active_minutes: Some(45),
                ..Default::default()
            },
            DataCategory::HeartRate => DailyMetrics {
                resting_heart_rate: Some(58),
                ..Default::default()
            },
            DataCategory::Sleep => DailyMetrics {
                sleep_hours: Some(7.5),
                ..Default::default()
            },
            DataCategory::Body => DailyMetrics {
                weight_kg: Some(70.2),
                body_fat_percent: Some(18.5),
                ..Default::default()
            },
            DataCategory::BodyComposition => DailyMetrics {
                weight_kg: Some(65.0),
                body_fat_percent: Some(21.0),
                muscle_mass_kg: Some(48.3),
                body_age: Some(35),
                ..Default::default()
            },
        }
    }

    fn check(
        &self,
        access_token: &str,
        category: DataCategory,
        date: NaiveDate,
    ) -> Result<(), ProviderError> {
        let script = self.script.lock().unwrap();
        if script.rejected_tokens.contains(access_token) {
            return Err(ProviderError::unauthorized("HTTP 401 Unauthorized").with_status(401));
        }
        if script.failing_dates.contains(&date) || script.failing_categories.contains(&category) {
            return Err(
                ProviderError::new(SyncErrorType::ServerError, "HTTP 503 Service Unavailable")
                    .with_status(503),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderApi for FakeProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn categories(&self) -> &'static [DataCategory] {
        match self.provider {
            Provider::Fitbit => FITBIT_CATEGORIES,
            Provider::HealthPlanet => HEALTH_PLANET_CATEGORIES,
        }
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://provider.test/{}/authorize?redirect_uri={}&state={}",
            self.provider,
            urlencoding::encode(redirect_uri),
            urlencoding::encode(state)
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if code == "bad-code" {
            return Err(
                ProviderError::new(SyncErrorType::ClientError, "HTTP 400 Bad Request")
                    .with_status(400)
                    .with_body("invalid_grant"),
            );
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", code),
            refresh_token: Some(format!("refresh-{}", code)),
            expires_in: 28800,
            scope: Some("activity sleep".to_string()),
            provider_user_id: Some("ABC123".to_string()),
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let (delay, error, winner) = {
            let mut script = self.script.lock().unwrap();
            (
                script.refresh_delay,
                script.refresh_error.clone(),
                script.race_winner.take(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((store, credential)) = winner {
            store.upsert_credential(&credential).await.unwrap();
        }
        if let Some(error) = error {
            return Err(error);
        }

        Ok(TokenGrant {
            access_token: format!("access-refreshed-{}", n),
            refresh_token: Some(format!("refresh-refreshed-{}", n)),
            expires_in: 28800,
            scope: None,
            provider_user_id: None,
        })
    }

    async fn fetch(
        &self,
        access_token: &str,
        category: DataCategory,
        date: NaiveDate,
    ) -> Result<DailyMetrics, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.check(access_token, category, date)?;
        Ok(self.metrics_for(category, date))
    }

    fn query_window(&self, start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self.provider {
            Provider::HealthPlanet => clamp_query_window(start, end),
            Provider::Fitbit => (start, end),
        }
    }

    async fn fetch_range(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DailyMetrics>, ProviderError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.provider != Provider::HealthPlanet {
            return Err(ProviderError::new(
                SyncErrorType::ClientError,
                "range sync unsupported",
            ));
        }
        let mut days = BTreeMap::new();
        let mut date = start;
        while date <= end {
            self.check(access_token, DataCategory::BodyComposition, date)?;
            days.insert(date, self.metrics_for(DataCategory::BodyComposition, date));
            date += Duration::days(1);
        }
        Ok(days)
    }

    async fn revoke(&self, _access_token: &str) -> Result<(), ProviderError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Router, state and the fake providers behind it.
#[allow(dead_code)]
pub struct TestApp {
    pub router: axum::Router,
    pub state: Arc<AppState>,
    pub fitbit: Arc<FakeProvider>,
    pub health_planet: Arc<FakeProvider>,
}

#[allow(dead_code)]
impl TestApp {
    /// Session token for `user_id`.
    pub fn token(&self, user_id: &str) -> String {
        create_test_jwt(user_id, &self.state.config.jwt_signing_key)
    }

    pub fn provider(&self, provider: Provider) -> &Arc<FakeProvider> {
        match provider {
            Provider::Fitbit => &self.fitbit,
            Provider::HealthPlanet => &self.health_planet,
        }
    }

    /// Send a request and decode the JSON body (Null when empty or not JSON).
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str, user_id: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        user_id: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.json_request("POST", uri, user_id, body).await
    }

    pub async fn delete_json(
        &self,
        uri: &str,
        user_id: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        self.json_request("DELETE", uri, user_id, body).await
    }

    async fn json_request(
        &self,
        method: &str,
        uri: &str,
        user_id: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token(user_id)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}

/// Create a test app on a fresh in-memory database with fake providers.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    create_test_app_with(Config::default()).await
}

#[allow(dead_code)]
pub async fn create_test_app_with(config: Config) -> TestApp {
    let db = Db::in_memory().await.unwrap();
    let fitbit = Arc::new(FakeProvider::new(Provider::Fitbit));
    let health_planet = Arc::new(FakeProvider::new(Provider::HealthPlanet));
    let registry = ProviderRegistry::new()
        .with(fitbit.clone())
        .with(health_planet.clone());

    let state = Arc::new(AppState::new(config, db, registry).unwrap());
    TestApp {
        router: create_router(state.clone()),
        state,
        fitbit,
        health_planet,
    }
}

/// Seed a credential for (user, provider) that expires in `expires_in`.
#[allow(dead_code)]
pub async fn connect(state: &AppState, user_id: &str, provider: Provider, expires_in: Duration) {
    let now = Utc::now();
    let credential = Credential {
        user_id: user_id.to_string(),
        provider,
        access_token: SEED_ACCESS_TOKEN.to_string(),
        refresh_token: SEED_REFRESH_TOKEN.to_string(),
        expires_at: now + expires_in,
        scope: None,
        provider_user_id: None,
        created_at: now,
        updated_at: now,
    };
    state.tokens.store().upsert_credential(&credential).await.unwrap();
}

/// Create a test JWT token.
#[allow(dead_code)]
pub fn create_test_jwt(user_id: &str, signing_key: &[u8]) -> String {
    create_jwt(user_id, signing_key).unwrap()
}

#[allow(dead_code)]
pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}
