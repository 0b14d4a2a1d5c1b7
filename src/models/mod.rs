// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credential;
pub mod health_record;
pub mod provider;
pub mod sync_error;

pub use credential::Credential;
pub use health_record::{DailyHealthRecord, DailyMetrics};
pub use provider::{DataCategory, Provider};
pub use sync_error::{NewSyncError, SyncErrorRecord};
