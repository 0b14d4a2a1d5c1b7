// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (SQLite via sqlx).
//!
//! One `impl Db` block per table lives in the submodules:
//! - `credentials`: users and encrypted provider credentials
//! - `health_records`: one row per (user, provider, date)
//! - `sync_errors`: append-only failure log
//! - `oauth_keys`: consumed OAuth states and codes

pub mod credentials;
pub mod health_records;
pub mod oauth_keys;
pub mod sync_errors;

pub use credentials::StoredCredential;

use crate::error::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Table names as constants.
pub mod tables {
    pub const USERS: &str = "users";
    pub const CREDENTIALS: &str = "provider_credentials";
    pub const DAILY_RECORDS: &str = "daily_health_records";
    pub const SYNC_ERRORS: &str = "sync_errors";
    pub const OAUTH_CONSUMED_KEYS: &str = "oauth_consumed_keys";
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS provider_credentials (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        provider TEXT NOT NULL,
        access_token_encrypted TEXT NOT NULL,
        refresh_token_encrypted TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        scope TEXT,
        provider_user_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, provider)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS daily_health_records (
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        provider TEXT NOT NULL,
        date TEXT NOT NULL,
        steps INTEGER,
        calories_burned INTEGER,
        distance_km REAL,
        active_minutes INTEGER,
        sleep_hours REAL,
        resting_heart_rate INTEGER,
        weight_kg REAL,
        body_fat_percent REAL,
        muscle_mass_kg REAL,
        bone_mass_kg REAL,
        visceral_fat_level REAL,
        basal_metabolic_rate INTEGER,
        body_age INTEGER,
        synced_at TEXT NOT NULL,
        UNIQUE (user_id, provider, date)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS sync_errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        provider TEXT NOT NULL,
        date TEXT NOT NULL,
        category TEXT,
        error_type TEXT NOT NULL,
        error_message TEXT NOT NULL,
        occurred_at TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_sync_errors_user_time ON sync_errors(user_id, occurred_at)",
    r"
    CREATE TABLE IF NOT EXISTS oauth_consumed_keys (
        key TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        consumed_at TEXT NOT NULL
    )
    ",
];

/// SQLite database handle.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Connect and create the schema if needed.
    ///
    /// `sqlite::memory:` gets a single long-lived connection so every query
    /// sees the same database.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| AppError::Database(format!("Invalid DATABASE_URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.migrate().await?;

        tracing::info!(in_memory, "Connected to database");
        Ok(db)
    }

    /// Fresh private in-memory database (tests, local experiments).
    pub async fn in_memory() -> Result<Self, AppError> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Map a stored enum string back to its type.
pub(crate) fn decode_enum<T>(
    column: &str,
    raw: &str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<T, AppError> {
    parse(raw).ok_or_else(|| {
        AppError::Database(format!("Unexpected value {:?} in column {}", raw, column))
    })
}

pub(crate) fn decode_timestamp(
    column: &str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::Utc>, AppError> {
    decode_enum(column, raw, crate::time_utils::parse_utc_rfc3339)
}

pub(crate) fn decode_date(column: &str, raw: &str) -> Result<chrono::NaiveDate, AppError> {
    decode_enum(column, raw, crate::time_utils::parse_date)
}

pub(crate) fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
