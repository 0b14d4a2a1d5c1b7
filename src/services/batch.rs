// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sequential multi-date sync with pacing, a circuit breaker and cancellation.
//!
//! Dates run one at a time in the order given. Each date is isolated: a
//! failure is recorded and the batch moves on, unless too many dates fail
//! in a row. Cancellation is honoured between dates and during the pauses;
//! a date already in flight always finishes.

use crate::config::SyncSettings;
use crate::error::{AppError, SyncErrorType};
use crate::models::Provider;
use crate::services::retry::RetryNotice;
use crate::services::sync::DaySynchronizer;
use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Progress events, forwarded to clients as SSE.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum BatchEvent {
    Started {
        provider: Provider,
        total: usize,
    },
    Progress {
        current: usize,
        total: usize,
        date: NaiveDate,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<SyncErrorType>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RateLimited {
        date: NaiveDate,
        attempt: u32,
        wait_seconds: u64,
    },
    Complete {
        summary: BatchSummary,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<SyncErrorType>,
        message: String,
    },
}

impl BatchEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            BatchEvent::Started { .. } => "started",
            BatchEvent::Progress { .. } => "progress",
            BatchEvent::RateLimited { .. } => "rate_limited",
            BatchEvent::Complete { .. } => "complete",
            BatchEvent::Error { .. } => "error",
        }
    }
}

/// Outcome for one date of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub success: bool,
    /// Some categories failed but data was stored.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<SyncErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_requested: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub stopped_early: bool,
    pub cancelled: bool,
    pub results: Vec<DateOutcome>,
}

/// Pacing and breaker limits for a batch.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub success_delay: Duration,
    pub failure_delay: Duration,
    pub failure_threshold: u32,
}

impl From<&SyncSettings> for BatchSettings {
    fn from(s: &SyncSettings) -> Self {
        Self {
            success_delay: s.success_delay,
            failure_delay: s.failure_delay,
            failure_threshold: s.failure_threshold.max(1),
        }
    }
}

#[derive(Clone)]
pub struct BatchSynchronizer {
    day: DaySynchronizer,
    settings: BatchSettings,
}

impl BatchSynchronizer {
    pub fn new(day: DaySynchronizer, settings: BatchSettings) -> Self {
        Self { day, settings }
    }

    /// Sync `dates` in order. Events go to `events` when given.
    pub async fn run(
        &self,
        user_id: &str,
        provider: Provider,
        dates: &[NaiveDate],
        cancel: CancellationToken,
        events: Option<mpsc::Sender<BatchEvent>>,
    ) -> BatchSummary {
        let total = dates.len();
        let mut summary = BatchSummary {
            total_requested: total,
            ..Default::default()
        };
        let mut consecutive_failures = 0u32;

        tracing::info!(user_id, provider = %provider, total, "Batch sync started");
        emit(&events, BatchEvent::Started { provider, total }).await;

        for (index, &date) in dates.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let notify = events.clone();
            let result = self
                .day
                .sync_day_with(user_id, provider, date, move |notice: &RetryNotice| {
                    if notice.kind != SyncErrorType::RateLimited {
                        return;
                    }
                    if let Some(tx) = &notify {
                        let _ = tx.try_send(BatchEvent::RateLimited {
                            date,
                            attempt: notice.attempt,
                            wait_seconds: notice.wait.as_secs(),
                        });
                    }
                })
                .await;

            summary.processed += 1;
            let fatal = match &result {
                Err(e) => is_fatal(e),
                Ok(_) => false,
            };

            let outcome = match result {
                Ok(day) => {
                    summary.succeeded += 1;
                    consecutive_failures = 0;
                    DateOutcome {
                        date,
                        success: true,
                        partial: day.is_partial(),
                        error_type: None,
                        error: None,
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    consecutive_failures += 1;
                    DateOutcome {
                        date,
                        success: false,
                        partial: false,
                        error_type: e.error_type(),
                        error: Some(e.to_string()),
                    }
                }
            };

            emit(
                &events,
                BatchEvent::Progress {
                    current: index + 1,
                    total,
                    date,
                    success: outcome.success,
                    error_type: outcome.error_type,
                    error: outcome.error.clone(),
                },
            )
            .await;

            let succeeded = outcome.success;
            summary.results.push(outcome);

            if fatal {
                let last = summary.results.last();
                emit(
                    &events,
                    BatchEvent::Error {
                        error_type: last.and_then(|o| o.error_type),
                        message: last.and_then(|o| o.error.clone()).unwrap_or_default(),
                    },
                )
                .await;
                summary.stopped_early = index + 1 < total;
                break;
            }

            if consecutive_failures >= self.settings.failure_threshold {
                tracing::warn!(
                    user_id,
                    provider = %provider,
                    consecutive_failures,
                    "Too many consecutive failures, stopping batch"
                );
                summary.stopped_early = index + 1 < total;
                break;
            }

            if index + 1 < total {
                let pause = if succeeded {
                    self.settings.success_delay
                } else {
                    self.settings.failure_delay
                };
                if !pause.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            summary.cancelled = true;
                            break;
                        }
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        tracing::info!(
            user_id,
            provider = %provider,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            stopped_early = summary.stopped_early,
            cancelled = summary.cancelled,
            "Batch sync finished"
        );

        emit(
            &events,
            BatchEvent::Complete {
                summary: summary.clone(),
            },
        )
        .await;
        summary
    }
}

/// Errors that would fail every remaining date the same way. Token failures
/// are not among them; they count toward the consecutive-failure limit.
fn is_fatal(error: &AppError) -> bool {
    error.error_type() == Some(SyncErrorType::ConfigError)
}

async fn emit(events: &Option<mpsc::Sender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        // Receiver gone means the client went away; the batch still finishes.
        let _ = tx.send(event).await;
    }
}
