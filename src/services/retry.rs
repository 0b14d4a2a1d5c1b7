// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider failure classification and bounded retries.
//!
//! Every provider response that is not a 2xx goes through [`classify_status`];
//! transport failures go through [`classify_transport`]. [`RetryPolicy::run`]
//! then decides whether and how long to wait before the next attempt.

use crate::error::{ProviderError, SyncErrorType};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;

/// Fitbit's rate-limit reset hint (seconds until the hourly window resets).
const FITBIT_RATE_LIMIT_RESET: &str = "fitbit-rate-limit-reset";

/// Longest response body kept on an error.
const MAX_ERROR_BODY: usize = 2048;

/// Classify a non-success HTTP response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: String) -> ProviderError {
    let code = status.as_u16();
    let kind = match code {
        401 => SyncErrorType::Unauthorized,
        429 => SyncErrorType::RateLimited,
        400 if body.contains("invalid_grant") => SyncErrorType::Unauthorized,
        500..=599 => SyncErrorType::ServerError,
        400..=499 => SyncErrorType::ClientError,
        _ => SyncErrorType::ServerError,
    };

    let retry_after = if kind == SyncErrorType::RateLimited {
        retry_after(headers)
    } else {
        None
    };

    let mut body = body;
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }

    ProviderError::new(kind, format!("HTTP {}", status))
        .with_status(code)
        .with_body(body)
        .with_retry_after(retry_after)
}

/// Classify a failure that happened before any response arrived.
pub fn classify_transport(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::network(format!("Request timed out: {}", err))
    } else if err.is_connect() {
        ProviderError::network(format!("Connection failed: {}", err))
    } else if err.is_decode() {
        ProviderError::malformed(format!("Unreadable response body: {}", err))
    } else {
        ProviderError::network(err.to_string())
    }
}

/// Wait hint from `Retry-After` (seconds or HTTP date), else Fitbit's reset header.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(raw) = header_str(headers, RETRY_AFTER.as_str()) {
        if let Ok(secs) = raw.parse::<u64>() {
            return Some(Duration::from_secs(secs));
        }
        if let Ok(when) = chrono::DateTime::parse_from_rfc2822(raw) {
            let wait = when.with_timezone(&chrono::Utc) - chrono::Utc::now();
            return Some(wait.to_std().unwrap_or(Duration::ZERO));
        }
    }

    header_str(headers, FITBIT_RATE_LIMIT_RESET)
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// A retry that is about to happen.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryNotice {
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    pub kind: SyncErrorType,
    pub wait: Duration,
}

/// Final failure after the policy gave up.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: ProviderError,
    /// Attempts made, including the first.
    pub attempts: u32,
}

impl RetryFailure {
    /// Retries made on top of the first attempt.
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Bounded retry with exponential backoff for transient provider failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_default_wait: Duration,
    pub rate_limit_max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            rate_limit_default_wait: Duration::from_secs(60),
            rate_limit_max_wait: Duration::from_secs(15 * 60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after `attempt` failed, without jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Wait before the next attempt, or `None` if `error` is terminal.
    pub fn delay_for(&self, error: &ProviderError, attempt: u32) -> Option<Duration> {
        match error.kind {
            SyncErrorType::RateLimited => Some(
                error
                    .retry_after
                    .unwrap_or(self.rate_limit_default_wait)
                    .min(self.rate_limit_max_wait),
            ),
            SyncErrorType::ServerError | SyncErrorType::NetworkError => {
                Some(with_jitter(self.backoff_delay(attempt)))
            }
            _ => None,
        }
    }

    /// Run `op` until it succeeds, fails terminally or runs out of attempts.
    ///
    /// `on_retry` is told about every wait before it starts.
    pub async fn run<T, F, Fut>(
        &self,
        op: F,
        on_retry: impl FnMut(&RetryNotice),
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.run_counted(op, on_retry)
            .await
            .map(|(value, _)| value)
    }

    /// [`run`](Self::run), also returning the attempts a success took.
    pub async fn run_counted<T, F, Fut>(
        &self,
        mut op: F,
        mut on_retry: impl FnMut(&RetryNotice),
    ) -> Result<(T, u32), RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op().await {
                Ok(value) => return Ok((value, attempt)),
                Err(e) => e,
            };

            let wait = match self.delay_for(&error, attempt) {
                Some(wait) if attempt < max_attempts => wait,
                _ => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    })
                }
            };

            tracing::warn!(
                attempt,
                error_type = %error.kind,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Provider request failed, retrying"
            );
            on_retry(&RetryNotice {
                attempt,
                kind: error.kind,
                wait,
            });

            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            attempt += 1;
        }
    }
}

/// Add uniform jitter of up to 25% of `delay`.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() / 4) as u64;
    if max_jitter_ms == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
    delay + Duration::from_millis(jitter)
}
