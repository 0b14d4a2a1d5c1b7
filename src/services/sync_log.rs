// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistent log of terminal sync failures.

use crate::db::Db;
use crate::error::{AppError, ProviderError};
use crate::models::{DataCategory, NewSyncError, Provider, SyncErrorRecord};
use chrono::{Duration, NaiveDate, Utc};

#[derive(Clone)]
pub struct SyncErrorLog {
    db: Db,
}

impl SyncErrorLog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append a failure. Storage errors are logged and swallowed.
    pub async fn record(
        &self,
        user_id: &str,
        provider: Provider,
        date: NaiveDate,
        category: Option<DataCategory>,
        error: &ProviderError,
        retry_count: u32,
    ) {
        let entry = NewSyncError {
            user_id: user_id.to_string(),
            provider,
            date,
            category,
            error_type: error.kind,
            error_message: error.message.clone(),
            occurred_at: Utc::now(),
            retry_count,
        };

        if let Err(e) = self.db.insert_sync_error(&entry).await {
            tracing::error!(
                user_id,
                provider = %provider,
                date = %date,
                error = %e,
                "Failed to record sync error"
            );
        }
    }

    /// Errors from the last `since_days` days, newest first.
    pub async fn list(
        &self,
        user_id: &str,
        provider: Option<Provider>,
        since_days: u32,
    ) -> Result<Vec<SyncErrorRecord>, AppError> {
        let since = Utc::now() - Duration::days(i64::from(since_days));
        self.db.list_sync_errors(user_id, provider, since).await
    }

    /// Delete errors older than `older_than_days` days. Returns the count.
    pub async fn purge(
        &self,
        user_id: &str,
        provider: Option<Provider>,
        older_than_days: u32,
    ) -> Result<u64, AppError> {
        let before = Utc::now() - Duration::days(i64::from(older_than_days));
        let deleted = self.db.purge_sync_errors(user_id, provider, before).await?;
        tracing::info!(user_id, older_than_days, deleted, "Purged sync errors");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncErrorType;

    fn new_error(user_id: &str, days_ago: i64) -> NewSyncError {
        NewSyncError {
            user_id: user_id.to_string(),
            provider: Provider::Fitbit,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            category: Some(DataCategory::Sleep),
            error_type: SyncErrorType::ServerError,
            error_message: "HTTP 503".to_string(),
            occurred_at: Utc::now() - Duration::days(days_ago),
            retry_count: 2,
        }
    }

    #[tokio::test]
    async fn test_purge_keeps_recent() {
        let db = Db::in_memory().await.unwrap();
        for _ in 0..5 {
            db.insert_sync_error(&new_error("u1", 45)).await.unwrap();
        }
        for _ in 0..2 {
            db.insert_sync_error(&new_error("u1", 1)).await.unwrap();
        }

        let log = SyncErrorLog::new(db);
        assert_eq!(log.purge("u1", None, 30).await.unwrap(), 5);
        assert_eq!(log.list("u1", None, 365).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_scoped() {
        let db = Db::in_memory().await.unwrap();
        db.insert_sync_error(&new_error("u1", 3)).await.unwrap();
        db.insert_sync_error(&new_error("u1", 1)).await.unwrap();
        db.insert_sync_error(&new_error("u1", 10)).await.unwrap();
        db.insert_sync_error(&new_error("u2", 1)).await.unwrap();

        let log = SyncErrorLog::new(db);
        let recent = log.list("u1", Some(Provider::Fitbit), 7).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].occurred_at > recent[1].occurred_at);
        assert_eq!(recent[0].category, Some(DataCategory::Sleep));
        assert_eq!(recent[0].retry_count, 2);

        assert!(log
            .list("u1", Some(Provider::HealthPlanet), 7)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_record_stores_error_fields() {
        let log = SyncErrorLog::new(Db::in_memory().await.unwrap());
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let err = ProviderError::new(SyncErrorType::RateLimited, "HTTP 429 Too Many Requests");
        log.record("u1", Provider::Fitbit, date, Some(DataCategory::Activity), &err, 2)
            .await;

        let rows = log.list("u1", None, 1).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].error_type, SyncErrorType::RateLimited);
        assert_eq!(rows[0].date, date);
        assert_eq!(rows[0].error_message, "HTTP 429 Too Many Requests");
    }
}
