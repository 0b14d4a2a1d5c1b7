// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local AEAD encryption for OAuth tokens at rest.
//!
//! AES-256-GCM with a key derived from `TOKEN_ENCRYPTION_KEY` via
//! HKDF-SHA256. Every ciphertext is bound to its owner through the AAD
//! (`provider:user_id`), so a row copied to another user fails to decrypt.
//! Stored format: base64(nonce || ciphertext || tag).

use crate::error::AppError;
use crate::models::Provider;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use std::sync::Arc;

const HKDF_SALT: &[u8] = b"health-sync/token-encryption/v1";
const HKDF_INFO: &[u8] = b"aes-256-gcm";

/// Token encryption service.
#[derive(Clone)]
pub struct TokenCipher {
    key: Arc<LessSafeKey>,
    rng: SystemRandom,
}

impl TokenCipher {
    /// Derive the AEAD key from raw key material.
    pub fn new(key_material: &[u8]) -> Result<Self, AppError> {
        if key_material.is_empty() {
            return Err(AppError::Config(
                "TOKEN_ENCRYPTION_KEY must not be empty".to_string(),
            ));
        }

        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key_material);
        let mut okm = [0u8; 32];
        hk.expand(HKDF_INFO, &mut okm)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HKDF expand failed: {}", e)))?;

        let unbound = UnboundKey::new(&AES_256_GCM, &okm)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid AEAD key length")))?;

        Ok(Self {
            key: Arc::new(LessSafeKey::new(unbound)),
            rng: SystemRandom::new(),
        })
    }

    /// Encrypt plaintext bound to `aad`. Returns base64.
    pub fn encrypt(&self, plaintext: &str, aad: &[u8]) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Nonce generation failed")))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::from(aad),
                &mut in_out,
            )
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Token encryption failed")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypt base64 ciphertext produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, encoded: &str, aad: &[u8]) -> Result<String, AppError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Base64 decode failed: {}", e)))?;

        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Ciphertext too short"
            )));
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid nonce")))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::from(aad), &mut in_out)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Token decryption failed")))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("UTF-8 decode failed: {}", e)))
    }
}

/// AAD binding a token to its owner.
pub fn token_aad(provider: Provider, user_id: &str) -> Vec<u8> {
    format!("{}:{}", provider, user_id).into_bytes()
}
