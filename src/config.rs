// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Provider OAuth credentials are optional: a missing provider is reported
//! as a `CONFIG_ERROR` when a user tries to use it, not at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::retry::RetryPolicy;

/// How long a signed OAuth state (or a manually entered code) stays usable.
pub const OAUTH_WINDOW_MINUTES: i64 = 10;

/// Name of the session cookie read by the auth middleware.
pub const SESSION_COOKIE: &str = "health_sync_token";

/// OAuth client registration for one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Tunables for token refresh, retries and batch pacing.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Refresh a token when it expires sooner than this.
    pub refresh_margin: Duration,
    /// Attempts per provider request, including the first.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Wait used for a 429 without a usable `Retry-After`.
    pub rate_limit_wait: Duration,
    /// Upper bound on any single rate-limit wait.
    pub rate_limit_max_wait: Duration,
    /// Pause after a successful date in a batch.
    pub success_delay: Duration,
    /// Pause after a failed date in a batch.
    pub failure_delay: Duration,
    /// Consecutive failed dates that stop a batch.
    pub failure_threshold: u32,
    /// Largest number of dates one batch may request.
    pub max_batch_days: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            refresh_margin: Duration::from_secs(30 * 60),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(60),
            rate_limit_max_wait: Duration::from_secs(15 * 60),
            success_delay: Duration::from_millis(1000),
            failure_delay: Duration::from_millis(2500),
            failure_threshold: 3,
            max_batch_days: 90,
        }
    }
}

impl SyncSettings {
    /// Same limits as the defaults, but with every delay set to zero.
    pub fn without_delays() -> Self {
        Self {
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            rate_limit_wait: Duration::ZERO,
            rate_limit_max_wait: Duration::ZERO,
            success_delay: Duration::ZERO,
            failure_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            rate_limit_default_wait: self.rate_limit_wait,
            rate_limit_max_wait: self.rate_limit_max_wait,
        }
    }

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            refresh_margin: Duration::from_secs(
                env_or("SYNC_REFRESH_MARGIN_MINUTES", defaults.refresh_margin.as_secs() / 60)?
                    * 60,
            ),
            max_attempts: env_or("SYNC_MAX_ATTEMPTS", defaults.max_attempts)?.max(1),
            retry_base_delay: millis_env("SYNC_RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?,
            retry_max_delay: millis_env("SYNC_RETRY_MAX_DELAY_MS", defaults.retry_max_delay)?,
            rate_limit_wait: Duration::from_secs(env_or(
                "SYNC_RATE_LIMIT_WAIT_SECS",
                defaults.rate_limit_wait.as_secs(),
            )?),
            rate_limit_max_wait: defaults.rate_limit_max_wait,
            success_delay: millis_env("BATCH_SUCCESS_DELAY_MS", defaults.success_delay)?,
            failure_delay: millis_env("BATCH_FAILURE_DELAY_MS", defaults.failure_delay)?,
            failure_threshold: env_or("BATCH_FAILURE_THRESHOLD", defaults.failure_threshold)?
                .max(1),
            max_batch_days: env_or("BATCH_MAX_DAYS", defaults.max_batch_days)?.max(1),
        })
    }
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL for OAuth result redirects
    pub frontend_url: String,
    /// Public base URL of this API (OAuth callback target)
    pub api_url: String,
    /// Server port
    pub port: u16,
    /// sqlx connection string
    pub database_url: String,

    // --- Secrets ---
    /// Fitbit OAuth client, if configured
    pub fitbit: Option<ProviderCredentials>,
    /// HealthPlanet OAuth client, if configured
    pub health_planet: Option<ProviderCredentials>,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for the OAuth state parameter
    pub oauth_state_key: Vec<u8>,
    /// Input key material for credential encryption at rest
    pub token_encryption_key: Vec<u8>,

    pub sync: SyncSettings,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            port: 8080,
            database_url: "sqlite::memory:".to_string(),
            fitbit: Some(ProviderCredentials {
                client_id: "test_fitbit_id".to_string(),
                client_secret: "test_fitbit_secret".to_string(),
            }),
            health_planet: Some(ProviderCredentials {
                client_id: "test_hp_id".to_string(),
                client_secret: "test_hp_secret".to_string(),
            }),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_oauth_state_key_32_bytes!!".to_vec(),
            token_encryption_key: b"test_token_encryption_key_32byte".to_vec(),
            sync: SyncSettings::without_delays(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| format!("http://localhost:{}", port)),
            port,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://health_sync.db?mode=rwc".to_string()),

            fitbit: provider_from_env("FITBIT_CLIENT_ID", "FITBIT_CLIENT_SECRET"),
            health_planet: provider_from_env("HEALTHPLANET_CLIENT_ID", "HEALTHPLANET_CLIENT_SECRET"),
            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),
            token_encryption_key: required("TOKEN_ENCRYPTION_KEY")?.into_bytes(),

            sync: SyncSettings::from_env()?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn provider_from_env(id_var: &str, secret_var: &str) -> Option<ProviderCredentials> {
    let client_id = env::var(id_var).ok()?.trim().to_string();
    let client_secret = env::var(secret_var).ok()?.trim().to_string();
    if client_id.is_empty() || client_secret.is_empty() {
        return None;
    }
    Some(ProviderCredentials {
        client_id,
        client_secret,
    })
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn millis_env(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(name, default.as_millis() as u64).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
