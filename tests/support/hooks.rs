//! Deterministic crypto hooks for tests.
//!
//! Built on `sha2` so runs are reproducible and independent of `ring`.
//! NOT secure: the AEAD is a SHA-256 keystream with an HMAC tag, random
//! bytes come from a counter, and "signatures" are plain digests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fieldcrypt::{CryptoHooks, HookError, HookResult};
use sha2::{Digest, Sha256};

const TAG_LEN: usize = 16;

#[derive(Debug, Default)]
pub struct StubHooks {
    counter: AtomicU64,
    failing: Mutex<Option<&'static str>>,
    signed: AtomicU64,
}

impl StubHooks {
    /// Make every later call to `hook` fail.
    pub fn fail(&self, hook: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            *failing = Some(hook);
        }
    }

    /// Number of signatures produced so far.
    pub fn signatures(&self) -> u64 {
        self.signed.load(Ordering::SeqCst)
    }

    fn check(&self, hook: &'static str) -> HookResult<()> {
        match *self.failing.lock().map_err(|_| HookError::new("poisoned"))? {
            Some(failing) if failing == hook => Err(HookError::new(format!("{} disabled", hook))),
            _ => Ok(()),
        }
    }
}

pub fn hmac(key: &[u8], input: &[u8]) -> Vec<u8> {
    let mut block = if key.len() > 64 {
        Sha256::digest(key).to_vec()
    } else {
        key.to_vec()
    };
    block.resize(64, 0);
    let ipad: Vec<u8> = block.iter().map(|b| b ^ 0x36).collect();
    let opad: Vec<u8> = block.iter().map(|b| b ^ 0x5c).collect();
    let inner = Sha256::new().chain_update(&ipad).chain_update(input).finalize();
    Sha256::new()
        .chain_update(&opad)
        .chain_update(inner)
        .finalize()
        .to_vec()
}

fn keystream_xor(key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
    data.chunks(32)
        .enumerate()
        .flat_map(|(i, chunk)| {
            let block = Sha256::new()
                .chain_update(key)
                .chain_update(iv)
                .chain_update((i as u32).to_be_bytes())
                .finalize();
            chunk
                .iter()
                .zip(block)
                .map(|(d, k)| d ^ k)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn tag(key: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    let mut input = Vec::with_capacity(iv.len() + aad.len() + ciphertext.len());
    input.extend_from_slice(iv);
    input.extend_from_slice(aad);
    input.extend_from_slice(ciphertext);
    let mut mac = hmac(key, &input);
    mac.truncate(TAG_LEN);
    mac
}

impl CryptoHooks for StubHooks {
    fn sign_rsaes_pkcs1_v1_5(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>> {
        self.check("sign_rsaes_pkcs1_v1_5")?;
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(Sha256::new()
            .chain_update(key)
            .chain_update(input)
            .finalize()
            .to_vec())
    }

    fn hmac_sha256(&self, key: &[u8], input: &[u8]) -> HookResult<Vec<u8>> {
        self.check("hmac_sha256")?;
        Ok(hmac(key, input))
    }

    fn sha256(&self, input: &[u8]) -> HookResult<Vec<u8>> {
        self.check("sha256")?;
        Ok(Sha256::digest(input).to_vec())
    }

    fn aead_encrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> HookResult<Vec<u8>> {
        self.check("aead_encrypt")?;
        let mut out = keystream_xor(key, iv, plaintext);
        let mac = tag(key, iv, aad, &out);
        out.extend_from_slice(&mac);
        Ok(out)
    }

    fn aead_decrypt(
        &self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> HookResult<Vec<u8>> {
        self.check("aead_decrypt")?;
        if ciphertext.len() < TAG_LEN {
            return Err(HookError::new("ciphertext shorter than tag"));
        }
        let (body, mac) = ciphertext.split_at(ciphertext.len() - TAG_LEN);
        if tag(key, iv, aad, body) != mac {
            return Err(HookError::new("authentication failed"));
        }
        Ok(keystream_xor(key, iv, body))
    }

    fn random(&self, len: usize) -> HookResult<Vec<u8>> {
        self.check("random")?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::with_capacity(len);
        let mut block = 0u32;
        while out.len() < len {
            let digest = Sha256::new()
                .chain_update(n.to_be_bytes())
                .chain_update(block.to_be_bytes())
                .finalize();
            out.extend_from_slice(&digest);
            block += 1;
        }
        out.truncate(len);
        Ok(out)
    }
}
