// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-day (and HealthPlanet date-range) synchronization.
//!
//! A day sync validates the token, fetches each category independently
//! through the retry policy and upserts whatever arrived. A provider 401
//! triggers at most one forced token refresh per day sync.

use crate::db::Db;
use crate::error::{AppError, ProviderError, SyncErrorType};
use crate::models::{Credential, DailyHealthRecord, DailyMetrics, DataCategory, Provider};
use crate::services::retry::{RetryFailure, RetryNotice, RetryPolicy};
use crate::services::sync_log::SyncErrorLog;
use crate::services::token::TokenManager;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::future::Future;

/// Result of one category fetch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOutcome {
    pub category: DataCategory,
    pub success: bool,
    /// Attempts made, including a retry after a forced token refresh.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<SyncErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a day sync that wrote a record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySyncOutcome {
    pub date: NaiveDate,
    pub record: DailyHealthRecord,
    pub categories: Vec<CategoryOutcome>,
}

impl DaySyncOutcome {
    pub fn is_partial(&self) -> bool {
        self.categories.iter().any(|c| !c.success)
    }
}

/// Result of a HealthPlanet range sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSyncOutcome {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_synced: usize,
    pub records: Vec<DailyHealthRecord>,
}

/// Why a fetch (with its token handling) gave up.
enum FetchFailure {
    /// Provider kept failing; already classified.
    Provider(RetryFailure),
    /// Token could not be refreshed; ends the whole sync.
    Token(AppError),
}

/// Per-sync token state: the credential in use and whether it was force-refreshed.
struct TokenSession {
    credential: Credential,
    refreshed: bool,
}

/// Synchronizes one (user, provider, date).
#[derive(Clone)]
pub struct DaySynchronizer {
    tokens: TokenManager,
    db: Db,
    errors: SyncErrorLog,
    retry: RetryPolicy,
}

impl DaySynchronizer {
    pub fn new(tokens: TokenManager, db: Db, errors: SyncErrorLog, retry: RetryPolicy) -> Self {
        Self {
            tokens,
            db,
            errors,
            retry,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn sync_day(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
    ) -> Result<DaySyncOutcome, AppError> {
        self.sync_day_with(user_id, provider, date, |_| {}).await
    }

    /// Like [`sync_day`](Self::sync_day), reporting every scheduled retry.
    pub async fn sync_day_with(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
        mut on_retry: impl FnMut(&RetryNotice) + Send,
    ) -> Result<DaySyncOutcome, AppError> {
        let client = self.tokens.registry().get(provider)?;
        let mut session = self.start_session(user_id, provider, date).await?;

        let mut metrics = DailyMetrics::default();
        let mut outcomes = Vec::with_capacity(client.categories().len());
        let mut first_failure: Option<ProviderError> = None;

        for &category in client.categories() {
            let fetched = self
                .fetch_with_refresh(
                    user_id,
                    provider,
                    &mut session,
                    |token| {
                        let client = client.clone();
                        async move { client.fetch(&token, category, date).await }
                    },
                    &mut on_retry,
                )
                .await;

            match fetched {
                Ok((data, attempts)) => {
                    metrics.merge(data);
                    outcomes.push(CategoryOutcome {
                        category,
                        success: true,
                        attempts,
                        error_type: None,
                        error: None,
                    });
                }
                Err(FetchFailure::Provider(failure)) => {
                    tracing::warn!(
                        user_id,
                        provider = %provider,
                        date = %date,
                        category = %category,
                        error = %failure.error,
                        attempts = failure.attempts,
                        "Category fetch failed"
                    );
                    self.errors
                        .record(
                            user_id,
                            provider,
                            date,
                            Some(category),
                            &failure.error,
                            failure.retry_count(),
                        )
                        .await;
                    outcomes.push(CategoryOutcome {
                        category,
                        success: false,
                        attempts: failure.attempts,
                        error_type: Some(failure.error.kind),
                        error: Some(failure.error.message.clone()),
                    });
                    first_failure.get_or_insert(failure.error);
                }
                Err(FetchFailure::Token(e)) => {
                    self.record_token_failure(user_id, provider, date, &e).await;
                    return Err(e);
                }
            }
        }

        if outcomes.iter().all(|o| !o.success) {
            if let Some(error) = first_failure {
                return Err(error.into());
            }
        }

        let record = DailyHealthRecord {
            user_id: user_id.to_string(),
            provider,
            date,
            metrics,
            synced_at: Utc::now(),
        };
        self.db.upsert_daily_record(&record).await?;

        tracing::info!(
            user_id,
            provider = %provider,
            date = %date,
            fields = record.metrics.field_count(),
            failed_categories = outcomes.iter().filter(|o| !o.success).count(),
            "Day synced"
        );

        Ok(DaySyncOutcome {
            date,
            record,
            categories: outcomes,
        })
    }

    /// Fetch `[start, end]` in one provider call and upsert every returned date.
    pub async fn sync_range(
        &self,
        user_id: &str,
        provider: Provider,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RangeSyncOutcome, AppError> {
        if start > end {
            return Err(AppError::BadRequest(
                "startDate must not be after endDate".to_string(),
            ));
        }

        let client = self.tokens.registry().get(provider)?;
        let (start, end) = client.query_window(start, end);
        let mut session = self.start_session(user_id, provider, end).await?;

        let fetched = self
            .fetch_with_refresh(
                user_id,
                provider,
                &mut session,
                |token| {
                    let client = client.clone();
                    async move { client.fetch_range(&token, start, end).await }
                },
                &mut |_: &RetryNotice| {},
            )
            .await;

        let days = match fetched {
            Ok((days, _)) => days,
            Err(FetchFailure::Provider(failure)) => {
                self.errors
                    .record(
                        user_id,
                        provider,
                        end,
                        client.categories().first().copied(),
                        &failure.error,
                        failure.retry_count(),
                    )
                    .await;
                return Err(failure.error.into());
            }
            Err(FetchFailure::Token(e)) => {
                self.record_token_failure(user_id, provider, end, &e).await;
                return Err(e);
            }
        };

        let synced_at = Utc::now();
        let mut records = Vec::with_capacity(days.len());
        for (date, metrics) in days {
            let record = DailyHealthRecord {
                user_id: user_id.to_string(),
                provider,
                date,
                metrics,
                synced_at,
            };
            self.db.upsert_daily_record(&record).await?;
            records.push(record);
        }

        tracing::info!(
            user_id,
            provider = %provider,
            start = %start,
            end = %end,
            days = records.len(),
            "Range synced"
        );

        Ok(RangeSyncOutcome {
            start_date: start,
            end_date: end,
            days_synced: records.len(),
            records,
        })
    }

    async fn start_session(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
    ) -> Result<TokenSession, AppError> {
        match self.tokens.valid_credential(user_id, provider).await {
            Ok(credential) => Ok(TokenSession {
                credential,
                refreshed: false,
            }),
            Err(e) => {
                self.record_token_failure(user_id, provider, date, &e).await;
                Err(e)
            }
        }
    }

    /// Run `op` through the retry policy; on a 401, force one refresh per
    /// session and run it once more with the new token.
    async fn fetch_with_refresh<T, F, Fut>(
        &self,
        user_id: &str,
        provider: Provider,
        session: &mut TokenSession,
        mut op: F,
        on_retry: &mut (impl FnMut(&RetryNotice) + Send),
    ) -> Result<(T, u32), FetchFailure>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = Result<T, ProviderError>> + Send,
    {
        let token = session.credential.access_token.clone();
        let failure = match self
            .retry
            .run_counted(|| op(token.clone()), &mut *on_retry)
            .await
        {
            Ok(done) => return Ok(done),
            Err(failure) => failure,
        };

        if failure.error.kind != SyncErrorType::Unauthorized || session.refreshed {
            return Err(FetchFailure::Provider(failure));
        }

        session.refreshed = true;
        session.credential = self
            .tokens
            .force_refresh(user_id, provider, &session.credential.access_token)
            .await
            .map_err(FetchFailure::Token)?;

        let token = session.credential.access_token.clone();
        match self
            .retry
            .run_counted(|| op(token.clone()), &mut *on_retry)
            .await
        {
            Ok((value, attempts)) => Ok((value, failure.attempts + attempts)),
            Err(mut second) => {
                second.attempts += failure.attempts;
                Err(FetchFailure::Provider(second))
            }
        }
    }

    async fn record_token_failure(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
        error: &AppError,
    ) {
        tracing::warn!(user_id, provider = %provider, date = %date, error = %error, "Token validation failed");
        if let AppError::Provider(e) = error {
            if e.kind != SyncErrorType::ConfigError {
                self.errors.record(user_id, provider, date, None, e, 0).await;
            }
        }
    }
}
