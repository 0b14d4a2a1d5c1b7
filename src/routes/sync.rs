// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync, status and data routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{DailyHealthRecord, Provider, SyncErrorRecord};
use crate::services::batch::BatchEvent;
use crate::services::sync::{DaySyncOutcome, RangeSyncOutcome};
use crate::time_utils::{dates_descending, format_utc_rfc3339, last_days, parse_date};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use super::parse_provider;

/// Longest span `GET /records` will return.
const MAX_RECORD_RANGE_DAYS: i64 = 366;
const DEFAULT_ERROR_WINDOW_DAYS: u32 = 7;
/// Buffered batch events per SSE client.
const EVENT_BUFFER: usize = 64;

/// Sync routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/{provider}/sync", post(sync_day))
        .route("/api/{provider}/batch-sync", post(batch_sync))
        .route("/api/{provider}/sync-range", post(sync_range))
        .route("/api/{provider}/status", get(status))
        .route("/api/{provider}/disconnect", post(disconnect))
        .route("/api/{provider}/records", get(records))
        .route(
            "/api/{provider}/sync-errors",
            get(list_sync_errors).delete(purge_sync_errors),
        )
}

fn require_date(field: &str, raw: &str) -> Result<NaiveDate> {
    parse_date(raw)
        .ok_or_else(|| AppError::BadRequest(format!("{} must be a YYYY-MM-DD date", field)))
}

fn require_range(start: &str, end: &str) -> Result<(NaiveDate, NaiveDate)> {
    let start = require_date("startDate", start)?;
    let end = require_date("endDate", end)?;
    if start > end {
        return Err(AppError::BadRequest(
            "startDate must not be after endDate".to_string(),
        ));
    }
    Ok((start, end))
}

fn validated<T: Validate>(payload: &T) -> Result<()> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

// ─── Single Day ──────────────────────────────────────────────

#[derive(Deserialize, Validate)]
pub struct SyncRequest {
    #[validate(length(equal = 10))]
    pub date: String,
}

async fn sync_day(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<DaySyncOutcome>> {
    let provider = parse_provider(&provider)?;
    validated(&payload)?;
    let date = require_date("date", &payload.date)?;

    let outcome = state.sync.sync_day(&user.user_id, provider, date).await?;
    Ok(Json(outcome))
}

// ─── Batch ───────────────────────────────────────────────────

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BatchSyncRequest {
    /// Sync the `days` dates ending yesterday.
    #[validate(range(min = 1, max = 366))]
    pub days: Option<u32>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl BatchSyncRequest {
    /// Requested dates, newest first.
    fn dates(&self, today: NaiveDate, max_days: u32) -> Result<Vec<NaiveDate>> {
        let dates = match (self.days, &self.start_date, &self.end_date) {
            (Some(days), None, None) => last_days(today, days),
            (None, Some(start), Some(end)) => {
                let (start, end) = require_range(start, end)?;
                dates_descending(start, end)
            }
            _ => {
                return Err(AppError::BadRequest(
                    "Provide either days or both startDate and endDate".to_string(),
                ))
            }
        };

        if dates.len() > max_days as usize {
            return Err(AppError::BadRequest(format!(
                "At most {} days can be synced in one batch",
                max_days
            )));
        }
        Ok(dates)
    }
}

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Batch sync. Streams SSE events when the client asks for
/// `text/event-stream`, otherwise answers with the final summary.
///
/// Dropping the connection cancels the batch after the date in flight.
async fn batch_sync(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<BatchSyncRequest>,
) -> Result<Response> {
    let provider = parse_provider(&provider)?;
    validated(&payload)?;
    let dates = payload.dates(Utc::now().date_naive(), state.config.sync.max_batch_days)?;

    // Fail fast on a missing integration or connection.
    state.tokens.registry().get(provider)?;
    if state
        .tokens
        .store()
        .get_credential(&user.user_id, provider)
        .await?
        .is_none()
    {
        return Err(AppError::NotConnected(format!(
            "{} is not connected",
            provider.display_name()
        )));
    }

    let cancel = CancellationToken::new();

    if wants_event_stream(&headers) {
        let (tx, rx) = tokio::sync::mpsc::channel::<BatchEvent>(EVENT_BUFFER);
        let batch = state.batch.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            batch
                .run(&user.user_id, provider, &dates, token, Some(tx))
                .await;
        });

        // Cancelled when the response stream is dropped.
        let guard = cancel.drop_guard();
        let stream = ReceiverStream::new(rx).map(move |event| {
            let _guard = &guard;
            Event::default().event(event.name()).json_data(&event)
        });

        return Ok(Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let batch = state.batch.clone();
    let token = cancel.clone();
    let _guard = cancel.drop_guard();
    let summary = tokio::spawn(async move {
        batch
            .run(&user.user_id, provider, &dates, token, None)
            .await
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("Batch task failed: {}", e)))?;

    Ok(Json(summary).into_response())
}

// ─── Range (HealthPlanet) ────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    pub start_date: String,
    pub end_date: String,
}

async fn sync_range(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Json(payload): Json<RangeRequest>,
) -> Result<Json<RangeSyncOutcome>> {
    let provider = parse_provider(&provider)?;
    if provider != Provider::HealthPlanet {
        return Err(AppError::BadRequest(format!(
            "Range sync is not available for {}",
            provider.display_name()
        )));
    }
    let (start, end) = require_range(&payload.start_date, &payload.end_date)?;

    let outcome = state
        .sync
        .sync_range(&user.user_id, provider, start, end)
        .await?;
    Ok(Json(outcome))
}

// ─── Connection Status ───────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StatusResponse {
    pub connected: bool,
    pub expired: bool,
    pub expires_at: Option<String>,
    pub last_sync_at: Option<String>,
}

async fn status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<StatusResponse>> {
    let provider = parse_provider(&provider)?;
    let credential = state
        .tokens
        .store()
        .get_credential(&user.user_id, provider)
        .await?;
    let last_sync_at = state.db.last_synced_at(&user.user_id, provider).await?;

    let now = Utc::now();
    Ok(Json(StatusResponse {
        connected: credential.is_some(),
        expired: credential.as_ref().is_some_and(|c| c.is_expired(now)),
        expires_at: credential.map(|c| format_utc_rfc3339(c.expires_at)),
        last_sync_at: last_sync_at.map(format_utc_rfc3339),
    }))
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DisconnectResponse {
    pub disconnected: bool,
}

/// Revoke at the provider (best effort) and forget the credential.
///
/// Stored daily records are kept.
async fn disconnect(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<DisconnectResponse>> {
    let provider = parse_provider(&provider)?;
    let credential = state
        .tokens
        .store()
        .get_credential(&user.user_id, provider)
        .await?;

    if let Some(credential) = &credential {
        match state.tokens.registry().get(provider) {
            Ok(client) => {
                if let Err(e) = client.revoke(&credential.access_token).await {
                    tracing::warn!(
                        user_id = %user.user_id,
                        provider = %provider,
                        error = %e,
                        "Provider revoke failed, deleting credential anyway"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(provider = %provider, error = %e, "Skipping provider revoke");
            }
        }
    }

    let deleted = state
        .tokens
        .store()
        .delete_credential(&user.user_id, provider)
        .await?;

    tracing::info!(user_id = %user.user_id, provider = %provider, deleted, "Provider disconnected");
    Ok(Json(DisconnectResponse {
        disconnected: deleted,
    }))
}

// ─── Stored Records ──────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsQuery {
    pub start_date: String,
    pub end_date: String,
}

#[derive(Serialize)]
pub struct RecordsResponse {
    pub records: Vec<DailyHealthRecord>,
}

async fn records(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Query(params): Query<RecordsQuery>,
) -> Result<Json<RecordsResponse>> {
    let provider = parse_provider(&provider)?;
    let (start, end) = require_range(&params.start_date, &params.end_date)?;
    if (end - start).num_days() >= MAX_RECORD_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "Date range must be at most {} days",
            MAX_RECORD_RANGE_DAYS
        )));
    }

    let records = state
        .db
        .list_daily_records(&user.user_id, provider, start, end)
        .await?;
    Ok(Json(RecordsResponse { records }))
}

// ─── Sync Error Log ──────────────────────────────────────────

#[derive(Deserialize, Validate)]
pub struct ErrorListQuery {
    #[validate(range(min = 1, max = 365))]
    pub days: Option<u32>,
}

#[derive(Serialize)]
pub struct ErrorListResponse {
    pub errors: Vec<SyncErrorRecord>,
}

async fn list_sync_errors(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Query(params): Query<ErrorListQuery>,
) -> Result<Json<ErrorListResponse>> {
    let provider = parse_provider(&provider)?;
    validated(&params)?;

    let errors = state
        .errors
        .list(
            &user.user_id,
            Some(provider),
            params.days.unwrap_or(DEFAULT_ERROR_WINDOW_DAYS),
        )
        .await?;
    Ok(Json(ErrorListResponse { errors }))
}

#[derive(Deserialize, Validate)]
pub struct PurgeRequest {
    #[validate(range(max = 3650))]
    pub days: u32,
}

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PurgeResponse {
    pub deleted: u64,
}

async fn purge_sync_errors(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Json(payload): Json<PurgeRequest>,
) -> Result<Json<PurgeResponse>> {
    let provider = parse_provider(&provider)?;
    validated(&payload)?;

    let deleted = state
        .errors
        .purge(&user.user_id, Some(provider), payload.days)
        .await?;
    Ok(Json(PurgeResponse { deleted }))
}
