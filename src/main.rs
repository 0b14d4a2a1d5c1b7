// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Health-Sync API Server
//!
//! Connects user accounts to Fitbit and HealthPlanet and stores one
//! normalized health record per user, provider and day.

use health_sync::{config::Config, db::Db, provider_registry, AppState};
use health_sync::models::Provider;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, "Starting Health-Sync API");

    // Open (and migrate) the database
    let db = Db::connect(&config.database_url).await?;

    // Provider clients for every configured integration
    let registry = provider_registry(&config);
    for provider in [Provider::Fitbit, Provider::HealthPlanet] {
        if registry.is_configured(provider) {
            tracing::info!(provider = %provider, "Provider integration enabled");
        } else {
            tracing::warn!(provider = %provider, "Provider integration not configured");
        }
    }

    // Build shared state
    let state = Arc::new(AppState::new(config.clone(), db, registry)?);

    // Build router
    let app = health_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("health_sync=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
