// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod batch;
pub mod crypto;
pub mod fitbit;
pub mod health_planet;
pub mod oauth_state;
pub mod provider;
pub mod retry;
pub mod sync;
pub mod sync_log;
pub mod token;

pub use batch::{BatchEvent, BatchSummary, BatchSynchronizer};
pub use crypto::TokenCipher;
pub use fitbit::FitbitClient;
pub use health_planet::HealthPlanetClient;
pub use oauth_state::OAuthStates;
pub use provider::{ProviderApi, ProviderRegistry, TokenGrant};
pub use retry::RetryPolicy;
pub use sync::DaySynchronizer;
pub use sync_log::SyncErrorLog;
pub use token::{TokenManager, TokenStore};
