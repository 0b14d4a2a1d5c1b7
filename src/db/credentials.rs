// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Users and encrypted provider credentials.

use super::{decode_enum, Db};
use crate::error::AppError;
use crate::models::Provider;
use crate::time_utils::format_utc_rfc3339;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Credential row as stored (tokens encrypted, timestamps RFC3339).
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub user_id: String,
    pub provider: Provider,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64)
    pub refresh_token_encrypted: String,
    /// When the access token expires (RFC3339)
    pub expires_at: String,
    pub scope: Option<String>,
    pub provider_user_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Db {
    // ─── User Operations ─────────────────────────────────────────

    /// Make sure a row exists for an externally authenticated user.
    pub async fn ensure_user(&self, user_id: &str) -> Result<(), AppError> {
        sqlx::query("INSERT INTO users (id, created_at) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
            .bind(user_id)
            .bind(format_utc_rfc3339(chrono::Utc::now()))
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove a user; credentials and daily records go with it.
    pub async fn delete_user(&self, user_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Credential Operations ───────────────────────────────────

    pub async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<StoredCredential>, AppError> {
        let row = sqlx::query(
            r"
            SELECT user_id, provider, access_token_encrypted, refresh_token_encrypted,
                   expires_at, scope, provider_user_id, created_at, updated_at
            FROM provider_credentials
            WHERE user_id = $1 AND provider = $2
            ",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| row_to_credential(&r)).transpose()
    }

    /// Insert or overwrite the credential for (user, provider) in one statement.
    pub async fn upsert_credential(&self, credential: &StoredCredential) -> Result<(), AppError> {
        self.ensure_user(&credential.user_id).await?;

        sqlx::query(
            r"
            INSERT INTO provider_credentials (
                user_id, provider, access_token_encrypted, refresh_token_encrypted,
                expires_at, scope, provider_user_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET
                access_token_encrypted = excluded.access_token_encrypted,
                refresh_token_encrypted = excluded.refresh_token_encrypted,
                expires_at = excluded.expires_at,
                scope = COALESCE(excluded.scope, provider_credentials.scope),
                provider_user_id = COALESCE(excluded.provider_user_id, provider_credentials.provider_user_id),
                updated_at = excluded.updated_at
            ",
        )
        .bind(&credential.user_id)
        .bind(credential.provider.as_str())
        .bind(&credential.access_token_encrypted)
        .bind(&credential.refresh_token_encrypted)
        .bind(&credential.expires_at)
        .bind(&credential.scope)
        .bind(&credential.provider_user_id)
        .bind(&credential.created_at)
        .bind(&credential.updated_at)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Delete the credential. Returns whether a row existed.
    pub async fn delete_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM provider_credentials WHERE user_id = $1 AND provider = $2")
                .bind(user_id)
                .bind(provider.as_str())
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_credential(row: &SqliteRow) -> Result<StoredCredential, AppError> {
    let provider: String = row.try_get("provider")?;
    Ok(StoredCredential {
        user_id: row.try_get("user_id")?,
        provider: decode_enum("provider", &provider, |s| s.parse().ok())?,
        access_token_encrypted: row.try_get("access_token_encrypted")?,
        refresh_token_encrypted: row.try_get("refresh_token_encrypted")?,
        expires_at: row.try_get("expires_at")?,
        scope: row.try_get("scope")?,
        provider_user_id: row.try_get("provider_user_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
