// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync error log records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::{DataCategory, Provider};
use crate::error::SyncErrorType;

/// One terminal sync failure, as stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorRecord {
    pub id: i64,
    pub user_id: String,
    pub provider: Provider,
    /// Date whose sync failed
    pub date: NaiveDate,
    /// Category that failed; `None` for failures before any fetch
    pub category: Option<DataCategory>,
    pub error_type: SyncErrorType,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
    /// Retries made before giving up
    pub retry_count: u32,
}

/// Insert payload for the error log.
#[derive(Debug, Clone)]
pub struct NewSyncError {
    pub user_id: String,
    pub provider: Provider,
    pub date: NaiveDate,
    pub category: Option<DataCategory>,
    pub error_type: SyncErrorType,
    pub error_message: String,
    pub occurred_at: DateTime<Utc>,
    pub retry_count: u32,
}
