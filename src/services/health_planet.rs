// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HealthPlanet (Tanita) client for innerscan body composition data.
//!
//! HealthPlanet serves a date range in one request, so a multi-day sync is a
//! single call followed by per-date grouping. Queries are limited to 90 days.

use crate::config::ProviderCredentials;
use crate::error::{ProviderError, SyncErrorType};
use crate::models::{DailyMetrics, DataCategory, Provider};
use crate::services::provider::{http_client, send_json, ProviderApi, TokenGrant};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

const API_BASE: &str = "https://www.healthplanet.jp";
const SCOPE: &str = "innerscan";

/// Longest span HealthPlanet accepts in one query.
pub const MAX_QUERY_DAYS: i64 = 90;

const CATEGORIES: &[DataCategory] = &[DataCategory::BodyComposition];

/// Innerscan tags we request and how they map onto [`DailyMetrics`].
const TAG_WEIGHT: &str = "6021";
const TAG_BODY_FAT: &str = "6022";
const TAG_MUSCLE_MASS: &str = "6023";
const TAG_VISCERAL_FAT: &str = "6025";
const TAG_BASAL_METABOLIC_RATE: &str = "6027";
const TAG_BODY_AGE: &str = "6028";
const TAG_BONE_MASS: &str = "6029";

const ALL_TAGS: &[&str] = &[
    TAG_WEIGHT,
    TAG_BODY_FAT,
    TAG_MUSCLE_MASS,
    TAG_VISCERAL_FAT,
    TAG_BASAL_METABOLIC_RATE,
    TAG_BODY_AGE,
    TAG_BONE_MASS,
];

/// HealthPlanet API client.
#[derive(Clone)]
pub struct HealthPlanetClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl HealthPlanetClient {
    pub fn new(credentials: ProviderCredentials) -> Self {
        Self::with_base_url(credentials, API_BASE)
    }

    pub fn with_base_url(credentials: ProviderCredentials, base_url: impl Into<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, ProviderError> {
        let mut params = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        params.extend_from_slice(form);

        let request = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(&params);
        send_json(request).await
    }
}

#[async_trait]
impl ProviderApi for HealthPlanetClient {
    fn provider(&self) -> Provider {
        Provider::HealthPlanet
    }

    fn categories(&self) -> &'static [DataCategory] {
        CATEGORIES
    }

    fn query_window(&self, start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
        clamp_query_window(start, end)
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "{}/oauth/auth?client_id={}&redirect_uri={}&scope={}&response_type=code&state={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            SCOPE,
            urlencoding::encode(state),
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("redirect_uri", redirect_uri),
            ("code", code),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn fetch(
        &self,
        access_token: &str,
        category: DataCategory,
        date: NaiveDate,
    ) -> Result<DailyMetrics, ProviderError> {
        if category != DataCategory::BodyComposition {
            return Err(ProviderError::new(
                SyncErrorType::ClientError,
                format!("HealthPlanet does not provide {}", category),
            ));
        }
        let mut days = self.fetch_range(access_token, date, date).await?;
        Ok(days.remove(&date).unwrap_or_default())
    }

    async fn fetch_range(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DailyMetrics>, ProviderError> {
        let (start, end) = clamp_query_window(start, end);
        let from = format!("{}000000", start.format("%Y%m%d"));
        let to = format!("{}235959", end.format("%Y%m%d"));
        let tags = ALL_TAGS.join(",");

        let request = self
            .http
            .get(format!("{}/status/innerscan.json", self.base_url))
            .query(&[
                ("access_token", access_token),
                ("date", "1"),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("tag", tags.as_str()),
            ]);
        let body: InnerscanResponse = send_json(request).await?;

        tracing::debug!(
            from = %from,
            to = %to,
            measurements = body.data.len(),
            "Fetched HealthPlanet innerscan data"
        );
        Ok(normalize_innerscan(&body))
    }

    /// HealthPlanet has no revocation endpoint; disconnecting only forgets the token.
    async fn revoke(&self, _access_token: &str) -> Result<(), ProviderError> {
        tracing::debug!("HealthPlanet has no token revocation endpoint");
        Ok(())
    }
}

/// Limit a query to the 90 days ending at `end`.
pub fn clamp_query_window(start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
    if end - start > Duration::days(MAX_QUERY_DAYS) {
        let clamped = end - Duration::days(MAX_QUERY_DAYS);
        tracing::warn!(
            requested_start = %start,
            start = %clamped,
            end = %end,
            "HealthPlanet query longer than 90 days, clamping start date"
        );
        (clamped, end)
    } else {
        (start, end)
    }
}

// ─── Payloads ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InnerscanResponse {
    #[serde(default)]
    pub data: Vec<InnerscanMeasurement>,
}

#[derive(Debug, Deserialize)]
pub struct InnerscanMeasurement {
    /// `yyyyMMddHHmm`, local time
    pub date: String,
    /// Decimal value as a string
    pub keydata: String,
    pub tag: String,
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// Group measurements per date; the latest reading of each tag wins.
///
/// Unknown tags and unreadable rows are skipped.
pub fn normalize_innerscan(body: &InnerscanResponse) -> BTreeMap<NaiveDate, DailyMetrics> {
    let mut latest: HashMap<(NaiveDate, &str), (NaiveDateTime, f64)> = HashMap::new();

    for m in &body.data {
        if !ALL_TAGS.contains(&m.tag.as_str()) {
            continue;
        }
        let Ok(measured_at) = NaiveDateTime::parse_from_str(&m.date, "%Y%m%d%H%M") else {
            tracing::debug!(date = %m.date, "Skipping measurement with unreadable date");
            continue;
        };
        let Ok(value) = m.keydata.trim().parse::<f64>() else {
            tracing::debug!(tag = %m.tag, keydata = %m.keydata, "Skipping unreadable value");
            continue;
        };

        let key = (measured_at.date(), m.tag.as_str());
        match latest.get(&key) {
            Some((seen_at, _)) if *seen_at > measured_at => {}
            _ => {
                latest.insert(key, (measured_at, value));
            }
        }
    }

    let mut days: BTreeMap<NaiveDate, DailyMetrics> = BTreeMap::new();
    for ((date, tag), (_, value)) in latest {
        apply_tag(days.entry(date).or_default(), tag, value);
    }
    days
}

fn apply_tag(metrics: &mut DailyMetrics, tag: &str, value: f64) {
    match tag {
        TAG_WEIGHT => metrics.weight_kg = Some(value),
        TAG_BODY_FAT => metrics.body_fat_percent = Some(value),
        TAG_MUSCLE_MASS => metrics.muscle_mass_kg = Some(value),
        TAG_VISCERAL_FAT => metrics.visceral_fat_level = Some(value),
        TAG_BASAL_METABOLIC_RATE => metrics.basal_metabolic_rate = Some(value.round() as i64),
        TAG_BODY_AGE => metrics.body_age = Some(value.round() as i64),
        TAG_BONE_MASS => metrics.bone_mass_kg = Some(value),
        _ => {}
    }
}
