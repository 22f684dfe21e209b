//! Crypto hooks backed by `ring`.
//!
//! Primitive choices:
//! - **AEAD**: AES-256-GCM, 96-bit IV, 128-bit tag appended to the ciphertext
//! - **MAC / digest**: HMAC-SHA-256 / SHA-256
//! - **Signing**: RSA PKCS#1 v1.5 with SHA-256 from a PKCS#8 key

use ::ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ::ring::rand::{SecureRandom, SystemRandom};
use ::ring::signature::{RsaKeyPair, RSA_PKCS1_SHA256};
use ::ring::{digest, hmac};

use super::{CryptoHooks, HookError, HookResult};

/// Host hooks implemented with `ring`.
#[derive(Debug)]
pub struct RingHooks {
    rng: SystemRandom,
}

impl RingHooks {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn key(key: &[u8]) -> HookResult<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| HookError::new("AES-256-GCM key must be 32 bytes"))?;
        Ok(LessSafeKey::new(unbound))
    }

    fn nonce(iv: &[u8]) -> HookResult<Nonce> {
        Nonce::try_assume_unique_for_key(iv)
            .map_err(|_| HookError::new(format!("IV must be {} bytes", aead::NONCE_LEN)))
    }
}

impl Default for RingHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoHooks for RingHooks {
    fn sign_rsaes_pkcs1_v1_5(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>> {
        let pair = RsaKeyPair::from_pkcs8(key)
            .map_err(|e| HookError::new(format!("invalid PKCS#8 RSA key: {}", e)))?;
        let mut signature = vec![0u8; pair.public().modulus_len()];
        pair.sign(&RSA_PKCS1_SHA256, &self.rng, input, &mut signature)
            .map_err(|_| HookError::new("RSA signing failed"))?;
        Ok(signature)
    }

    fn hmac_sha256(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        Ok(hmac::sign(&key, input).as_ref().to_vec())
    }

    fn sha256(&self, input: &[u8]) -> HookResult<Vec<u8>> {
        Ok(digest::digest(&digest::SHA256, input).as_ref().to_vec())
    }

    fn aead_encrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> HookResult<Vec<u8>> {
        let key = Self::key(key)?;
        let mut output = plaintext.to_vec();
        key.seal_in_place_append_tag(Self::nonce(iv)?, Aad::from(aad), &mut output)
            .map_err(|_| HookError::new("AES-256-GCM encryption failed"))?;
        Ok(output)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> HookResult<Vec<u8>> {
        let key = Self::key(key)?;
        let mut payload = ciphertext.to_vec();
        let plaintext = key
            .open_in_place(Self::nonce(iv)?, Aad::from(aad), &mut payload)
            .map_err(|_| HookError::new("AES-256-GCM authentication failed"))?;
        Ok(plaintext.to_vec())
    }

    fn random(&self, len: usize) -> HookResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.rng
            .fill(&mut buf)
            .map_err(|_| HookError::new("system randomness unavailable"))?;
        Ok(buf)
    }
}
