// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Append-only sync error log.

use super::{decode_date, decode_enum, decode_timestamp, format_date, Db};
use crate::error::{AppError, SyncErrorType};
use crate::models::{DataCategory, NewSyncError, Provider, SyncErrorRecord};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

impl Db {
    /// Append one error record. Returns its id.
    pub async fn insert_sync_error(&self, error: &NewSyncError) -> Result<i64, AppError> {
        let result = sqlx::query(
            r"
            INSERT INTO sync_errors (
                user_id, provider, date, category, error_type, error_message,
                occurred_at, retry_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&error.user_id)
        .bind(error.provider.as_str())
        .bind(format_date(error.date))
        .bind(error.category.map(DataCategory::as_str))
        .bind(error.error_type.as_str())
        .bind(&error.error_message)
        .bind(format_utc_rfc3339(error.occurred_at))
        .bind(i64::from(error.retry_count))
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Errors that occurred at or after `since`, newest first.
    ///
    /// `provider = None` lists every provider.
    pub async fn list_sync_errors(
        &self,
        user_id: &str,
        provider: Option<Provider>,
        since: DateTime<Utc>,
    ) -> Result<Vec<SyncErrorRecord>, AppError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, provider, date, category, error_type, error_message,
                   occurred_at, retry_count
            FROM sync_errors
            WHERE user_id = $1 AND ($2 IS NULL OR provider = $2) AND occurred_at >= $3
            ORDER BY occurred_at DESC, id DESC
            ",
        )
        .bind(user_id)
        .bind(provider.map(Provider::as_str))
        .bind(format_utc_rfc3339(since))
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_sync_error).collect()
    }

    /// Delete errors older than `before`. Returns the number removed.
    pub async fn purge_sync_errors(
        &self,
        user_id: &str,
        provider: Option<Provider>,
        before: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r"
            DELETE FROM sync_errors
            WHERE user_id = $1 AND ($2 IS NULL OR provider = $2) AND occurred_at < $3
            ",
        )
        .bind(user_id)
        .bind(provider.map(Provider::as_str))
        .bind(format_utc_rfc3339(before))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

fn row_to_sync_error(row: &SqliteRow) -> Result<SyncErrorRecord, AppError> {
    let provider: String = row.try_get("provider")?;
    let date: String = row.try_get("date")?;
    let category: Option<String> = row.try_get("category")?;
    let error_type: String = row.try_get("error_type")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let retry_count: i64 = row.try_get("retry_count")?;

    Ok(SyncErrorRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        provider: decode_enum("provider", &provider, |s| s.parse().ok())?,
        date: decode_date("date", &date)?,
        category: category
            .map(|c| decode_enum("category", &c, DataCategory::parse))
            .transpose()?,
        error_type: decode_enum("error_type", &error_type, SyncErrorType::parse)?,
        error_message: row.try_get("error_message")?,
        occurred_at: decode_timestamp("occurred_at", &occurred_at)?,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
    })
}
