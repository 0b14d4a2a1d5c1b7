// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Single-use tracking for OAuth states and authorization codes.
//!
//! Backed by the shared database so every instance sees the same set of
//! consumed keys. Expired rows are swept on each insert.

use super::Db;
use crate::error::AppError;
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Duration, Utc};

impl Db {
    /// Mark `key` as consumed by `user_id`.
    ///
    /// Returns `false` if the key was already consumed inside `window`.
    pub async fn consume_oauth_key(
        &self,
        key: &str,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool, AppError> {
        sqlx::query("DELETE FROM oauth_consumed_keys WHERE consumed_at < $1")
            .bind(format_utc_rfc3339(now - window))
            .execute(self.pool())
            .await?;

        let result = sqlx::query(
            r"
            INSERT INTO oauth_consumed_keys (key, user_id, consumed_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO NOTHING
            ",
        )
        .bind(key)
        .bind(user_id)
        .bind(format_utc_rfc3339(now))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
