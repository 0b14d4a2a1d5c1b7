// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Signed, time-boxed, single-use OAuth state and code tracking.
//!
//! State format (before base64url):
//! `user_id|provider|timestamp_ms_hex|nonce_hex|hmac_sha256_hex`
//!
//! Used states and manually submitted codes are recorded in the shared
//! database, so a second redemption fails on every instance.

use crate::config::OAUTH_WINDOW_MINUTES;
use crate::db::Db;
use crate::error::AppError;
use crate::models::Provider;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Tolerated clock skew for states issued by another instance.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Decoded, verified state.
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthState {
    pub user_id: String,
    pub provider: Provider,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("malformed state")]
    Malformed,
    #[error("state signature mismatch")]
    BadSignature,
    #[error("state expired")]
    Expired,
    #[error("state already used")]
    AlreadyUsed,
}

impl StateError {
    /// Short reason passed to the frontend redirect.
    pub fn reason(self) -> &'static str {
        match self {
            StateError::Malformed | StateError::BadSignature => "invalid_state",
            StateError::Expired => "expired_state",
            StateError::AlreadyUsed => "state_already_used",
        }
    }
}

/// Issues and redeems OAuth states; tracks manually entered codes.
#[derive(Clone)]
pub struct OAuthStates {
    key: Vec<u8>,
    db: Db,
    window: Duration,
    rng: SystemRandom,
}

impl OAuthStates {
    pub fn new(key: &[u8], db: Db) -> Self {
        Self {
            key: key.to_vec(),
            db,
            window: Duration::minutes(OAUTH_WINDOW_MINUTES),
            rng: SystemRandom::new(),
        }
    }

    /// Create a signed state for `user_id` connecting `provider`.
    pub fn issue(
        &self,
        user_id: &str,
        provider: Provider,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let mut nonce = [0u8; 16];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Nonce generation failed")))?;

        let payload = format!(
            "{}|{}|{:x}|{}",
            user_id,
            provider.as_str(),
            now.timestamp_millis(),
            hex::encode(nonce)
        );
        let signature = hex::encode(self.sign(payload.as_bytes())?);
        Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
    }

    /// Check signature and age without consuming the state.
    pub fn verify(&self, state: &str, now: DateTime<Utc>) -> Result<OAuthState, StateError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(state)
            .map_err(|_| StateError::Malformed)?;
        let decoded = String::from_utf8(bytes).map_err(|_| StateError::Malformed)?;

        // user_id may itself contain '|', so split from the right.
        let parts: Vec<&str> = decoded.rsplitn(5, '|').collect();
        let [signature_hex, nonce, timestamp_hex, provider, user_id] = parts[..] else {
            return Err(StateError::Malformed);
        };

        let payload_len = decoded.len() - signature_hex.len() - 1;
        let signature = hex::decode(signature_hex).map_err(|_| StateError::Malformed)?;
        let expected = self
            .sign(decoded[..payload_len].as_bytes())
            .map_err(|_| StateError::Malformed)?;
        if !bool::from(expected.as_slice().ct_eq(signature.as_slice())) {
            tracing::error!("OAuth state signature mismatch! Potential tampering.");
            return Err(StateError::BadSignature);
        }

        let provider: Provider = provider.parse().map_err(|_| StateError::Malformed)?;
        let millis = i64::from_str_radix(timestamp_hex, 16).map_err(|_| StateError::Malformed)?;
        let issued_at = DateTime::from_timestamp_millis(millis).ok_or(StateError::Malformed)?;

        if now - issued_at > self.window
            || issued_at - now > Duration::seconds(MAX_CLOCK_SKEW_SECS)
        {
            return Err(StateError::Expired);
        }

        Ok(OAuthState {
            user_id: user_id.to_string(),
            provider,
            issued_at,
            nonce: nonce.to_string(),
        })
    }

    /// Verify and consume a state. A second redemption fails.
    pub async fn redeem(&self, state: &str, now: DateTime<Utc>) -> Result<OAuthState, AppError> {
        let verified = self
            .verify(state, now)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let key = format!("state:{}", verified.nonce);
        if !self
            .db
            .consume_oauth_key(&key, &verified.user_id, now, self.window)
            .await?
        {
            return Err(AppError::Conflict(StateError::AlreadyUsed.to_string()));
        }
        Ok(verified)
    }

    /// Record a manually submitted authorization code.
    ///
    /// The same code twice within the window is rejected as already used.
    /// Only a hash of the code is stored.
    pub async fn redeem_code(
        &self,
        user_id: &str,
        provider: Provider,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let digest = hex::encode(Sha256::digest(code.as_bytes()));
        let key = format!("code:{}:{}", provider.as_str(), digest);
        if !self
            .db
            .consume_oauth_key(&key, user_id, now, self.window)
            .await?
        {
            tracing::warn!(user_id, provider = %provider, "Authorization code submitted twice");
            return Err(AppError::Conflict(
                "Authorization code already used".to_string(),
            ));
        }
        Ok(())
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AppError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
