// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Provider OAuth routes: connect URL, browser callback, manual code entry.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use super::parse_provider;
use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::Provider;
use crate::time_utils::format_utc_rfc3339;
use crate::AppState;

/// Routes reachable without a session (the state parameter identifies the user).
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/{provider}/callback", get(oauth_callback))
}

/// Routes that require a session.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/{provider}/connect-url", get(connect_url))
        .route("/api/{provider}/code", post(submit_code))
}

/// Redirect target registered with the provider.
fn callback_url(state: &AppState, provider: Provider) -> String {
    format!(
        "{}/api/{}/callback",
        state.config.api_url.trim_end_matches('/'),
        provider
    )
}

// ─── Connect URL ─────────────────────────────────────────────

#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ConnectUrlResponse {
    pub url: String,
}

/// Authorization URL carrying a signed, single-use state for this user.
async fn connect_url(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
) -> Result<Json<ConnectUrlResponse>> {
    let provider = parse_provider(&provider)?;
    let client = state.tokens.registry().get(provider)?;

    let oauth_state = state.oauth.issue(&user.user_id, provider, Utc::now())?;
    let url = client.authorize_url(&callback_url(&state, provider), &oauth_state);

    tracing::info!(user_id = %user.user_id, provider = %provider, "Issued OAuth connect URL");
    Ok(Json(ConnectUrlResponse { url }))
}

// ─── Callback ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

fn result_redirect(state: &AppState, provider: &str, outcome: std::result::Result<(), &str>) -> Redirect {
    let base = format!(
        "{}/integrations?provider={}",
        state.config.frontend_url.trim_end_matches('/'),
        urlencoding::encode(provider)
    );
    let url = match outcome {
        Ok(()) => format!("{}&status=success", base),
        Err(reason) => format!("{}&status=error&reason={}", base, urlencoding::encode(reason)),
    };
    Redirect::temporary(&url)
}

/// OAuth callback - verify state, exchange code, store the credential.
///
/// Always redirects back to the frontend; failures are reported in the
/// query string.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Path(raw_provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    match handle_callback(&state, &raw_provider, params).await {
        Ok(()) => result_redirect(&state, &raw_provider, Ok(())),
        Err(reason) => result_redirect(&state, &raw_provider, Err(reason)),
    }
}

async fn handle_callback(
    state: &AppState,
    raw_provider: &str,
    params: CallbackParams,
) -> std::result::Result<(), &'static str> {
    let provider = parse_provider(raw_provider).map_err(|_| "unknown_provider")?;

    if let Some(error) = params.error {
        tracing::warn!(provider = %provider, error = %error, "OAuth error from provider");
        return Err("access_denied");
    }
    let oauth_state = params.state.ok_or("missing_state")?;
    let code = params.code.ok_or("missing_code")?;

    let now = Utc::now();
    state.oauth.verify(&oauth_state, now).map_err(|e| {
        tracing::warn!(provider = %provider, error = %e, "Rejected OAuth state");
        e.reason()
    })?;
    let verified = state.oauth.redeem(&oauth_state, now).await.map_err(|e| {
        tracing::warn!(provider = %provider, error = %e, "OAuth state could not be redeemed");
        match e {
            AppError::Conflict(_) => "state_already_used",
            _ => "invalid_state",
        }
    })?;

    if verified.provider != provider {
        tracing::warn!(
            expected = %verified.provider,
            got = %provider,
            "OAuth state issued for another provider"
        );
        return Err("provider_mismatch");
    }

    let client = state
        .tokens
        .registry()
        .get(provider)
        .map_err(|_| "not_configured")?;

    tracing::info!(user_id = %verified.user_id, provider = %provider, "Exchanging authorization code for tokens");

    let grant = client
        .exchange_code(&code, &callback_url(state, provider))
        .await
        .map_err(|e| {
            tracing::error!(provider = %provider, error = %e, "Token exchange failed");
            "token_exchange_failed"
        })?;

    state
        .tokens
        .store_grant(&verified.user_id, provider, grant)
        .await
        .map_err(|e| {
            tracing::error!(provider = %provider, error = %e, "Failed to store credential");
            "storage_failed"
        })?;

    tracing::info!(user_id = %verified.user_id, provider = %provider, "Provider connected");
    Ok(())
}

// ─── Manual Code Entry ───────────────────────────────────────

#[derive(Deserialize, Validate)]
pub struct CodeRequest {
    #[validate(length(min = 1, max = 512))]
    pub code: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct CodeResponse {
    pub connected: bool,
    pub expires_at: String,
}

/// Exchange an authorization code the user pasted in.
///
/// The same code is refused for the OAuth window after its first use.
async fn submit_code(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(provider): Path<String>,
    Json(payload): Json<CodeRequest>,
) -> Result<Json<CodeResponse>> {
    let provider = parse_provider(&provider)?;
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let code = payload.code.trim();

    let client = state.tokens.registry().get(provider)?;
    state
        .oauth
        .redeem_code(&user.user_id, provider, code, Utc::now())
        .await?;

    let grant = client
        .exchange_code(code, &callback_url(&state, provider))
        .await?;
    let credential = state
        .tokens
        .store_grant(&user.user_id, provider, grant)
        .await?;

    tracing::info!(user_id = %user.user_id, provider = %provider, "Provider connected via manual code");
    Ok(Json(CodeResponse {
        connected: true,
        expires_at: format_utc_rfc3339(credential.expires_at),
    }))
}
