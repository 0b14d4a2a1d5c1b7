// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health-Sync: pull daily health data from Fitbit and HealthPlanet
//!
//! This crate provides the backend API that connects user accounts to
//! health-data providers over OAuth, keeps their tokens fresh and
//! normalizes each day's measurements into one stored record.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use chrono::Duration;
use config::Config;
use db::Db;
use error::AppError;
use services::batch::BatchSettings;
use services::{
    BatchSynchronizer, DaySynchronizer, FitbitClient, HealthPlanetClient, OAuthStates,
    ProviderRegistry, SyncErrorLog, TokenCipher, TokenManager, TokenStore,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Db,
    pub tokens: TokenManager,
    pub oauth: OAuthStates,
    pub sync: DaySynchronizer,
    pub batch: BatchSynchronizer,
    pub errors: SyncErrorLog,
}

impl AppState {
    /// Wire every service on top of `db` and the given provider clients.
    pub fn new(config: Config, db: Db, registry: ProviderRegistry) -> Result<Self, AppError> {
        let cipher = TokenCipher::new(&config.token_encryption_key)?;
        let refresh_margin = Duration::from_std(config.sync.refresh_margin)
            .map_err(|e| AppError::Config(format!("Invalid refresh margin: {}", e)))?;

        let tokens = TokenManager::new(TokenStore::new(db.clone(), cipher), registry, refresh_margin);
        let errors = SyncErrorLog::new(db.clone());
        let sync = DaySynchronizer::new(
            tokens.clone(),
            db.clone(),
            errors.clone(),
            config.sync.retry_policy(),
        );
        let batch = BatchSynchronizer::new(sync.clone(), BatchSettings::from(&config.sync));
        let oauth = OAuthStates::new(&config.oauth_state_key, db.clone());

        Ok(Self {
            config,
            db,
            tokens,
            oauth,
            sync,
            batch,
            errors,
        })
    }
}

/// Real provider clients for every provider with credentials configured.
pub fn provider_registry(config: &Config) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    if let Some(creds) = config.fitbit.clone() {
        registry.register(Arc::new(FitbitClient::new(creds)));
    }
    if let Some(creds) = config.health_planet.clone() {
        registry.register(Arc::new(HealthPlanetClient::new(creds)));
    }
    registry
}
