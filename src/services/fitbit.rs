// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit Web API client.
//!
//! Handles:
//! - OAuth code exchange, refresh and revocation (HTTP Basic client auth)
//! - Per-category daily fetches: activity, heart rate, sleep, body weight
//! - Normalization of Fitbit payloads into [`DailyMetrics`]
//!
//! Requests are sent without `Accept-Language`, so Fitbit answers in metric
//! units (kilometres, kilograms).

use crate::config::ProviderCredentials;
use crate::error::ProviderError;
use crate::models::{DailyMetrics, DataCategory, Provider};
use crate::services::provider::{http_client, send, send_json, ProviderApi, TokenGrant};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::NaiveDate;
use serde::Deserialize;

const API_BASE: &str = "https://api.fitbit.com";
const AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";
const SCOPES: &str = "activity heartrate sleep weight profile";

const CATEGORIES: &[DataCategory] = &[
    DataCategory::Activity,
    DataCategory::HeartRate,
    DataCategory::Sleep,
    DataCategory::Body,
];

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self::with_base_url(credentials, API_BASE)
    }

    /// Client against a different API host (token endpoint included).
    pub fn with_base_url(credentials: ProviderCredentials, base_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
        }
    }

    fn basic_auth(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(raw))
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let request = self
            .http
            .post(format!("{}/oauth2/token", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .form(form);
        send_json(request).await
    }

    /// Generic GET request with JSON response.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
    ) -> Result<T, ProviderError> {
        let request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(access_token);
        send_json(request).await
    }
}

#[async_trait]
impl ProviderApi for FitbitClient {
    fn provider(&self) -> Provider {
        Provider::Fitbit
    }

    fn categories(&self) -> &'static [DataCategory] {
        CATEGORIES
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            AUTHORIZE_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(SCOPES),
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn fetch(
        &self,
        access_token: &str,
        category: DataCategory,
        date: NaiveDate,
    ) -> Result<DailyMetrics, ProviderError> {
        let day = date.format("%Y-%m-%d");
        match category {
            DataCategory::Activity => {
                let path = format!("/1/user/-/activities/date/{}.json", day);
                let body: ActivityResponse = self.get_json(&path, access_token).await?;
                Ok(normalize_activity(&body))
            }
            DataCategory::HeartRate => {
                let path = format!("/1/user/-/activities/heart/date/{}/1d.json", day);
                let body: HeartRateResponse = self.get_json(&path, access_token).await?;
                Ok(normalize_heart_rate(&body))
            }
            DataCategory::Sleep => {
                let path = format!("/1.2/user/-/sleep/date/{}.json", day);
                let body: SleepResponse = self.get_json(&path, access_token).await?;
                Ok(normalize_sleep(&body))
            }
            DataCategory::Body => {
                let path = format!("/1/user/-/body/log/weight/date/{}.json", day);
                let body: WeightResponse = self.get_json(&path, access_token).await?;
                Ok(normalize_weight(&body))
            }
            DataCategory::BodyComposition => Err(ProviderError::new(
                crate::error::SyncErrorType::ClientError,
                "Fitbit does not provide body_composition",
            )),
        }
    }

    /// Revoke the grant.
    ///
    /// POST https://api.fitbit.com/oauth2/revoke
    ///
    /// Invalidates both the access and refresh token.
    async fn revoke(&self, access_token: &str) -> Result<(), ProviderError> {
        let request = self
            .http
            .post(format!("{}/oauth2/revoke", self.base_url))
            .header(reqwest::header::AUTHORIZATION, self.basic_auth())
            .form(&[("token", access_token)]);
        send(request).await?;
        tracing::info!("Fitbit token revoked");
        Ok(())
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ActivityResponse {
    pub summary: ActivitySummary,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub steps: Option<i64>,
    pub calories_out: Option<i64>,
    #[serde(default)]
    pub distances: Vec<ActivityDistance>,
    pub fairly_active_minutes: Option<i64>,
    pub very_active_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityDistance {
    pub activity: String,
    pub distance: f64,
}

#[derive(Debug, Deserialize)]
pub struct HeartRateResponse {
    #[serde(rename = "activities-heart", default)]
    pub days: Vec<HeartRateDay>,
}

#[derive(Debug, Deserialize)]
pub struct HeartRateDay {
    pub value: HeartRateValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateValue {
    pub resting_heart_rate: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SleepResponse {
    #[serde(default)]
    pub sleep: Vec<serde_json::Value>,
    pub summary: Option<SleepSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SleepSummary {
    pub total_minutes_asleep: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct WeightResponse {
    #[serde(default)]
    pub weight: Vec<WeightLog>,
}

#[derive(Debug, Deserialize)]
pub struct WeightLog {
    pub weight: f64,
    pub fat: Option<f64>,
    /// `HH:mm:ss`
    #[serde(default)]
    pub time: String,
}

// ─── Normalization ──────────────────────────────────────────────────────────

pub fn normalize_activity(body: &ActivityResponse) -> DailyMetrics {
    let s = &body.summary;
    let active_minutes = match (s.fairly_active_minutes, s.very_active_minutes) {
        (None, None) => None,
        (fairly, very) => Some(fairly.unwrap_or(0) + very.unwrap_or(0)),
    };

    DailyMetrics {
        steps: s.steps,
        calories_burned: s.calories_out,
        distance_km: s
            .distances
            .iter()
            .find(|d| d.activity == "total")
            .map(|d| d.distance),
        active_minutes,
        ..Default::default()
    }
}

pub fn normalize_heart_rate(body: &HeartRateResponse) -> DailyMetrics {
    DailyMetrics {
        resting_heart_rate: body.days.first().and_then(|d| d.value.resting_heart_rate),
        ..Default::default()
    }
}

/// Hours asleep, rounded to two decimals. `None` when no sleep was logged.
pub fn normalize_sleep(body: &SleepResponse) -> DailyMetrics {
    let minutes = if body.sleep.is_empty() {
        None
    } else {
        body.summary.as_ref().and_then(|s| s.total_minutes_asleep)
    };

    DailyMetrics {
        sleep_hours: minutes.map(|m| (m as f64 / 60.0 * 100.0).round() / 100.0),
        ..Default::default()
    }
}

/// Latest weight log of the day.
pub fn normalize_weight(body: &WeightResponse) -> DailyMetrics {
    match body.weight.iter().max_by(|a, b| a.time.cmp(&b.time)) {
        Some(latest) => DailyMetrics {
            weight_kg: Some(latest.weight),
            body_fat_percent: latest.fat,
            ..Default::default()
        },
        None => DailyMetrics::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_activity() {
        let body: ActivityResponse = serde_json::from_str(
            r#"{"summary":{"steps":8500,"caloriesOut":2300,
                "distances":[{"activity":"tracker","distance":6.0},{"activity":"total","distance":6.12}],
                "fairlyActiveMinutes":15,"veryActiveMinutes":20,"sedentaryMinutes":700}}"#,
        )
        .unwrap();
        let m = normalize_activity(&body);
        assert_eq!(m.steps, Some(8500));
        assert_eq!(m.calories_burned, Some(2300));
        assert_eq!(m.distance_km, Some(6.12));
        assert_eq!(m.active_minutes, Some(35));
    }

    #[test]
    fn test_normalize_activity_zero_steps_is_data() {
        let body: ActivityResponse =
            serde_json::from_str(r#"{"summary":{"steps":0,"distances":[]}}"#).unwrap();
        let m = normalize_activity(&body);
        assert_eq!(m.steps, Some(0));
        assert_eq!(m.distance_km, None);
        assert_eq!(m.active_minutes, None);
    }

    #[test]
    fn test_normalize_heart_rate() {
        let body: HeartRateResponse = serde_json::from_str(
            r#"{"activities-heart":[{"dateTime":"2024-03-01","value":{"restingHeartRate":61,"heartRateZones":[]}}]}"#,
        )
        .unwrap();
        assert_eq!(normalize_heart_rate(&body).resting_heart_rate, Some(61));

        let body: HeartRateResponse = serde_json::from_str(
            r#"{"activities-heart":[{"dateTime":"2024-03-01","value":{"heartRateZones":[]}}]}"#,
        )
        .unwrap();
        assert_eq!(normalize_heart_rate(&body).resting_heart_rate, None);
    }

    #[test]
    fn test_normalize_sleep_rounds_hours() {
        let body: SleepResponse = serde_json::from_str(
            r#"{"sleep":[{"logId":1}],"summary":{"totalMinutesAsleep":437,"totalTimeInBed":470}}"#,
        )
        .unwrap();
        assert_eq!(normalize_sleep(&body).sleep_hours, Some(7.28));
    }

    #[test]
    fn test_normalize_sleep_without_logs() {
        let body: SleepResponse =
            serde_json::from_str(r#"{"sleep":[],"summary":{"totalMinutesAsleep":0}}"#).unwrap();
        assert_eq!(normalize_sleep(&body).sleep_hours, None);
    }

    #[test]
    fn test_normalize_weight_takes_latest() {
        let body: WeightResponse = serde_json::from_str(
            r#"{"weight":[
                {"weight":71.2,"fat":21.0,"time":"07:10:00","date":"2024-03-01"},
                {"weight":70.8,"time":"21:45:00","date":"2024-03-01"}]}"#,
        )
        .unwrap();
        let m = normalize_weight(&body);
        assert_eq!(m.weight_kg, Some(70.8));
        assert_eq!(m.body_fat_percent, None);
    }

    #[test]
    fn test_authorize_url_is_encoded() {
        let client = FitbitClient::new(ProviderCredentials {
            client_id: "ABC".to_string(),
            client_secret: "secret".to_string(),
        });
        let url = client.authorize_url("http://localhost:8080/api/fitbit/callback", "st=ate");
        assert!(url.starts_with("https://www.fitbit.com/oauth2/authorize?response_type=code"));
        assert!(url.contains("client_id=ABC"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fapi%2Ffitbit%2Fcallback"));
        assert!(url.contains("state=st%3Date"));
        assert!(url.contains("scope=activity%20heartrate%20sleep%20weight%20profile"));
    }
}
