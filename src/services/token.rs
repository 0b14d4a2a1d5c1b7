// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential storage and access-token lifecycle.
//!
//! [`TokenStore`] encrypts and decrypts credentials around the database.
//! [`TokenManager`] hands out credentials that are valid for at least the
//! refresh margin, refreshing them with the provider when needed.

use crate::db::{Db, StoredCredential};
use crate::error::{AppError, ProviderError};
use crate::models::{Credential, Provider};
use crate::services::crypto::{token_aad, TokenCipher};
use crate::services::provider::{ProviderApi, ProviderRegistry, TokenGrant};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared refresh locks, one per (user, provider).
pub type RefreshLocks = Arc<DashMap<(String, Provider), Arc<Mutex<()>>>>;

/// Encrypted credential persistence.
#[derive(Clone)]
pub struct TokenStore {
    db: Db,
    cipher: TokenCipher,
}

impl TokenStore {
    pub fn new(db: Db, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    pub async fn get_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<Credential>, AppError> {
        let Some(stored) = self.db.get_credential(user_id, provider).await? else {
            return Ok(None);
        };

        let aad = token_aad(provider, user_id);
        let timestamp = |column: &str, raw: &str| {
            parse_utc_rfc3339(raw).ok_or_else(|| {
                AppError::Database(format!("Unreadable {} on credential: {}", column, raw))
            })
        };

        Ok(Some(Credential {
            user_id: stored.user_id,
            provider: stored.provider,
            access_token: self.cipher.decrypt(&stored.access_token_encrypted, &aad)?,
            refresh_token: self.cipher.decrypt(&stored.refresh_token_encrypted, &aad)?,
            expires_at: timestamp("expires_at", &stored.expires_at)?,
            scope: stored.scope,
            provider_user_id: stored.provider_user_id,
            created_at: timestamp("created_at", &stored.created_at)?,
            updated_at: timestamp("updated_at", &stored.updated_at)?,
        }))
    }

    /// Encrypt and upsert in one statement.
    pub async fn upsert_credential(&self, credential: &Credential) -> Result<(), AppError> {
        let aad = token_aad(credential.provider, &credential.user_id);
        let stored = StoredCredential {
            user_id: credential.user_id.clone(),
            provider: credential.provider,
            access_token_encrypted: self.cipher.encrypt(&credential.access_token, &aad)?,
            refresh_token_encrypted: self.cipher.encrypt(&credential.refresh_token, &aad)?,
            expires_at: format_utc_rfc3339(credential.expires_at),
            scope: credential.scope.clone(),
            provider_user_id: credential.provider_user_id.clone(),
            created_at: format_utc_rfc3339(credential.created_at),
            updated_at: format_utc_rfc3339(credential.updated_at),
        };
        self.db.upsert_credential(&stored).await
    }

    /// Idempotent: deleting a missing credential returns `false`.
    pub async fn delete_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<bool, AppError> {
        self.db.delete_credential(user_id, provider).await
    }
}

/// Hands out usable credentials, refreshing them when close to expiry.
#[derive(Clone)]
pub struct TokenManager {
    store: TokenStore,
    registry: ProviderRegistry,
    refresh_margin: Duration,
    /// Per-(user, provider) mutex to serialize refreshes.
    refresh_locks: RefreshLocks,
}

impl TokenManager {
    pub fn new(store: TokenStore, registry: ProviderRegistry, refresh_margin: Duration) -> Self {
        Self {
            store,
            registry,
            refresh_margin,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Number of (user, provider) pairs with a refresh running or queued.
    pub fn active_refreshes(&self) -> usize {
        self.refresh_locks.len()
    }

    /// A credential that stays valid for at least the refresh margin.
    ///
    /// No provider call is made when the stored token is still fresh.
    pub async fn valid_credential(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Credential, AppError> {
        let credential = self.load(user_id, provider).await?;
        if !credential.needs_refresh(Utc::now(), self.refresh_margin) {
            return Ok(credential);
        }

        tracing::info!(
            user_id,
            provider = %provider,
            expires_at = %credential.expires_at,
            "Access token expiring, refreshing"
        );
        self.refresh(user_id, provider, None).await
    }

    /// Refresh even though the token looks fresh (the provider answered 401).
    ///
    /// `rejected` is the access token the provider refused; if another task
    /// already replaced it, the replacement is returned without a new refresh.
    pub async fn force_refresh(
        &self,
        user_id: &str,
        provider: Provider,
        rejected: &str,
    ) -> Result<Credential, AppError> {
        tracing::info!(user_id, provider = %provider, "Forcing token refresh");
        self.refresh(user_id, provider, Some(rejected)).await
    }

    /// Build a credential from a token response and persist it.
    pub async fn store_grant(
        &self,
        user_id: &str,
        provider: Provider,
        grant: TokenGrant,
    ) -> Result<Credential, AppError> {
        let previous = self.store.get_credential(user_id, provider).await?;
        self.persist_grant(user_id, provider, grant, previous.as_ref())
            .await
    }

    async fn load(&self, user_id: &str, provider: Provider) -> Result<Credential, AppError> {
        self.store
            .get_credential(user_id, provider)
            .await?
            .ok_or_else(|| {
                AppError::NotConnected(format!("{} is not connected", provider.display_name()))
            })
    }

    async fn refresh(
        &self,
        user_id: &str,
        provider: Provider,
        rejected: Option<&str>,
    ) -> Result<Credential, AppError> {
        let client = self.registry.get(provider)?;

        let key = (user_id.to_string(), provider);
        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;
        let result = self.refresh_locked(&*client, user_id, provider, rejected).await;
        drop(guard);

        // Only the map and this task hold the lock: nobody is waiting on it.
        self.refresh_locks
            .remove_if(&key, |_, held| Arc::strong_count(held) == 2);
        result
    }

    async fn refresh_locked(
        &self,
        client: &dyn ProviderApi,
        user_id: &str,
        provider: Provider,
        rejected: Option<&str>,
    ) -> Result<Credential, AppError> {
        // Another task may have refreshed while we were waiting.
        let current = self.load(user_id, provider).await?;
        let already_replaced = match rejected {
            Some(token) => current.access_token != token,
            None => !current.needs_refresh(Utc::now(), self.refresh_margin),
        };
        if already_replaced {
            tracing::debug!(user_id, provider = %provider, "Token already refreshed by another task");
            return Ok(current);
        }

        match client.refresh_token(&current.refresh_token).await {
            Ok(grant) => {
                let credential = self
                    .persist_grant(user_id, provider, grant, Some(&current))
                    .await?;
                tracing::info!(
                    user_id,
                    provider = %provider,
                    expires_at = %credential.expires_at,
                    "Token refreshed"
                );
                Ok(credential)
            }
            Err(e) if e.is_invalid_grant() => {
                // Another instance may have rotated the refresh token first.
                let latest = self.load(user_id, provider).await?;
                if latest.refresh_token != current.refresh_token
                    && !latest.is_expired(Utc::now())
                {
                    tracing::info!(
                        user_id,
                        provider = %provider,
                        "Refresh token race detected, using the winner's token"
                    );
                    return Ok(latest);
                }
                tracing::warn!(user_id, provider = %provider, "Refresh token rejected by provider");
                Err(ProviderError::unauthorized(format!(
                    "{} rejected the refresh token; reconnect required",
                    provider.display_name()
                ))
                .with_status(e.status.unwrap_or(400))
                .into())
            }
            Err(e) => {
                tracing::warn!(user_id, provider = %provider, error = %e, "Token refresh failed");
                Err(e.into())
            }
        }
    }

    async fn persist_grant(
        &self,
        user_id: &str,
        provider: Provider,
        grant: TokenGrant,
        previous: Option<&Credential>,
    ) -> Result<Credential, AppError> {
        let now = Utc::now();
        let refresh_token = match (grant.refresh_token.clone(), previous) {
            (Some(token), _) => token,
            (None, Some(prev)) => prev.refresh_token.clone(),
            (None, None) => {
                return Err(ProviderError::malformed("Token response has no refresh_token").into())
            }
        };

        let credential = Credential {
            user_id: user_id.to_string(),
            provider,
            access_token: grant.access_token.clone(),
            refresh_token,
            expires_at: grant.expires_at(now),
            scope: grant
                .scope
                .clone()
                .or_else(|| previous.and_then(|p| p.scope.clone())),
            provider_user_id: grant
                .provider_user_id
                .clone()
                .or_else(|| previous.and_then(|p| p.provider_user_id.clone())),
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
        };

        self.store.upsert_credential(&credential).await?;
        Ok(credential)
    }
}
