//! Crypto hooks.
//!
//! The engine never implements cryptographic primitives. Whenever it needs
//! one it calls the host-supplied `CryptoHooks` capability given to
//! `CryptClient::create`.
//!
//! ## Bundled implementation
//!
//! - **ring**: Default feature. `RingHooks` implements every hook with `ring`.

use std::fmt;

use thiserror::Error;

use crate::error::{ClientError, Error};

#[cfg(feature = "ring")]
mod ring;

#[cfg(feature = "ring")]
pub use self::ring::RingHooks;

/// Failure reported by a hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type HookResult<T> = std::result::Result<T, HookError>;

/// Cryptographic capability set supplied by the host.
///
/// Implementations must be safe to share between contexts running on
/// different threads.
pub trait CryptoHooks: Send + Sync + fmt::Debug {
    /// RSASSA-PKCS1-v1_5 signature over SHA-256 of `input`.
    ///
    /// `key` is a DER encoded PKCS#8 private key.
    fn sign_rsaes_pkcs1_v1_5(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>>;

    /// HMAC-SHA-256 of `input`.
    fn hmac_sha256(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>>;

    /// SHA-256 digest of `input`.
    fn sha256(&self, input: &[u8]) -> HookResult<Vec<u8>>;

    /// Authenticated encryption. Returns ciphertext with the tag appended.
    fn aead_encrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> HookResult<Vec<u8>>;

    /// Authenticated decryption of ciphertext with appended tag.
    fn aead_decrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> HookResult<Vec<u8>>;

    /// `len` bytes from a secure random source.
    fn random(&self, len: usize) -> HookResult<Vec<u8>>;
}

/// Attach the hook name to a hook failure.
pub(crate) fn hook_failed(hook: &'static str) -> impl FnOnce(HookError) -> Error {
    move |e| {
        ClientError::CryptoHook {
            hook,
            message: e.0,
        }
        .into()
    }
}

/// Lowercase hex, as used in AWS signatures.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
