// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Common interface over the health data providers.

use crate::error::ProviderError;
use crate::models::{DailyMetrics, DataCategory, Provider};
use crate::services::retry::{classify_status, classify_transport};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Per-request timeout for provider calls.
pub(crate) const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Send a request; any non-2xx status becomes a classified error.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, &headers, body))
}

/// Send a request and parse the JSON body.
///
/// A 2xx whose body does not parse is a `SERVER_ERROR`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = send(request).await?;
    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;

    match serde_json::from_str(&body) {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(
            ProviderError::malformed(format!("Unexpected response body: {}", e))
                .with_status(status)
                .with_body(body),
        ),
    }
}

/// Token endpoint response, shared by code exchange and refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    /// Some providers omit this on refresh; the old refresh token stays valid then.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds from now.
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    /// Fitbit returns `user_id`.
    #[serde(default, alias = "user_id")]
    pub provider_user_id: Option<String>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.max(0))
    }
}

/// One provider's HTTP API.
#[async_trait]
pub trait ProviderApi: Send + Sync {
    fn provider(&self) -> Provider;

    /// Categories fetched by a single-day sync, in order.
    fn categories(&self) -> &'static [DataCategory];

    /// Browser URL that starts the authorization code flow.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str)
        -> Result<TokenGrant, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, ProviderError>;

    /// Fetch one category for one date.
    async fn fetch(
        &self,
        access_token: &str,
        category: DataCategory,
        date: NaiveDate,
    ) -> Result<DailyMetrics, ProviderError>;

    /// The part of `[start, end]` a ranged fetch will actually cover.
    fn query_window(&self, start: NaiveDate, end: NaiveDate) -> (NaiveDate, NaiveDate) {
        (start, end)
    }

    /// Fetch every date in `[start, end]` with as few requests as the API allows.
    ///
    /// Providers without a ranged endpoint report `CLIENT_ERROR`.
    async fn fetch_range(
        &self,
        _access_token: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<BTreeMap<NaiveDate, DailyMetrics>, ProviderError> {
        Err(ProviderError::new(
            crate::error::SyncErrorType::ClientError,
            format!("{} does not support range sync", self.provider().display_name()),
        ))
    }

    /// Invalidate the grant at the provider.
    async fn revoke(&self, access_token: &str) -> Result<(), ProviderError>;
}

/// Configured provider clients by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    clients: HashMap<Provider, Arc<dyn ProviderApi>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, client: Arc<dyn ProviderApi>) {
        self.clients.insert(client.provider(), client);
    }

    pub fn with(mut self, client: Arc<dyn ProviderApi>) -> Self {
        self.register(client);
        self
    }

    /// Client for `provider`, or `CONFIG_ERROR` if it has no credentials.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderApi>, ProviderError> {
        self.clients.get(&provider).cloned().ok_or_else(|| {
            ProviderError::config(format!(
                "{} integration is not configured",
                provider.display_name()
            ))
        })
    }

    pub fn is_configured(&self, provider: Provider) -> bool {
        self.clients.contains_key(&provider)
    }
}
