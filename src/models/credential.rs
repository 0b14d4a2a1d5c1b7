// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth credential model.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use super::Provider;

/// OAuth tokens for one (user, provider) pair.
///
/// Held in plaintext in memory; the database layer encrypts both tokens.
#[derive(Clone, PartialEq)]
pub struct Credential {
    /// Opaque application user id
    pub user_id: String,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Granted OAuth scopes, space separated
    pub scope: Option<String>,
    /// Provider-side account id (Fitbit returns one)
    pub provider_user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// True once the access token can no longer be used.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// True when the token expires in less than `margin` (or already has).
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at - now < margin
    }
}

// Tokens never reach log output.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("provider", &self.provider)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("provider_user_id", &self.provider_user_id)
            .finish()
    }
}
