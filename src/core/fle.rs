//! Intent-to-encrypt markings and field ciphertexts.
//!
//! Both travel as binaries of subtype 6. The first byte tells them apart:
//!
//! ```text
//! marking:     [ 0 ][ JSON {"a": alg, "ki" | "ka": key, "v": value} ]
//! ciphertext:  [ alg ][ key id (16) ][ type tag ][ iv (12) ][ aead ciphertext + tag ]
//! ```
//!
//! The AEAD additional data binds `[ alg ][ key id ][ type tag ]`.

use serde_json::Value;

use crate::core::constants::{ENCRYPTED_SUBTYPE, IV_LEN, KEY_ID_LEN};
use crate::core::document::{self, Binary};
use crate::core::hooks::{hook_failed, CryptoHooks};
use crate::core::key_vault::{KeyId, KeyRef};
use crate::error::{Result, SourceError};

const MARKING_TAG: u8 = 0;
const HEADER_LEN: usize = 1 + KEY_ID_LEN + 1;

/// Encryption algorithm of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Deterministic = 1,
    Random = 2,
}

impl Algorithm {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Deterministic),
            2 => Some(Self::Random),
            _ => None,
        }
    }
}

/// JSON type of the plaintext, recorded so decryption can check it.
fn type_tag(value: &Value) -> u8 {
    match value {
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
        Value::Null => 6,
    }
}

/// A field the query analyzer wants encrypted.
#[derive(Debug, Clone)]
pub(crate) struct Marking {
    pub algorithm: Algorithm,
    pub key: KeyRef,
    pub value: Value,
}

impl Marking {
    /// `None` when the binary is not a marking.
    pub fn parse(binary: &Binary) -> Option<std::result::Result<Self, String>> {
        if binary.subtype != ENCRYPTED_SUBTYPE || binary.bytes.first() != Some(&MARKING_TAG) {
            return None;
        }
        Some(Self::parse_body(&binary.bytes[1..]))
    }

    fn parse_body(body: &[u8]) -> std::result::Result<Self, String> {
        let doc = document::parse(body).map_err(|e| format!("marking: {}", e))?;

        let algorithm = doc
            .get("a")
            .and_then(Value::as_u64)
            .and_then(|a| u8::try_from(a).ok())
            .and_then(Algorithm::from_byte)
            .ok_or("marking has no valid algorithm \"a\"")?;

        let key = match (doc.get("ki"), doc.get("ka")) {
            (Some(id), None) => KeyRef::Id(KeyId::from_value(id)?),
            (None, Some(Value::String(name))) => KeyRef::AltName(name.clone()),
            (None, Some(_)) => return Err("marking \"ka\" must be a string".to_string()),
            (Some(_), Some(_)) => return Err("marking has both \"ki\" and \"ka\"".to_string()),
            (None, None) => return Err("marking names no key".to_string()),
        };

        let value = doc.get("v").cloned().ok_or("marking has no value \"v\"")?;
        if algorithm == Algorithm::Deterministic
            && matches!(value, Value::Null | Value::Bool(_) | Value::Object(_) | Value::Array(_))
        {
            return Err(format!(
                "deterministic encryption is not allowed for {} values",
                document::type_name(&value)
            ));
        }

        Ok(Self {
            algorithm,
            key,
            value,
        })
    }

    /// Encrypt the marked value with `data_key`.
    pub fn encrypt(
        &self,
        hooks: &dyn CryptoHooks,
        key_id: KeyId,
        data_key: &[u8],
    ) -> Result<Ciphertext> {
        let plaintext = document::to_bytes(&self.value)?;
        let mut ct = Ciphertext {
            algorithm: self.algorithm,
            key_id,
            type_tag: type_tag(&self.value),
            iv: Vec::new(),
            sealed: Vec::new(),
        };
        let aad = ct.aad();
        ct.iv = match self.algorithm {
            Algorithm::Random => hooks.random(IV_LEN).map_err(hook_failed("random"))?,
            Algorithm::Deterministic => {
                let mut input = aad.clone();
                input.extend_from_slice(&plaintext);
                let mut mac = hooks
                    .hmac_sha256(data_key, &input)
                    .map_err(hook_failed("hmac_sha256"))?;
                mac.truncate(IV_LEN);
                mac
            }
        };
        ct.sealed = hooks
            .aead_encrypt(data_key, &ct.iv, &aad, &plaintext)
            .map_err(hook_failed("aead_encrypt"))?;
        Ok(ct)
    }
}

/// An encrypted field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ciphertext {
    pub algorithm: Algorithm,
    pub key_id: KeyId,
    type_tag: u8,
    iv: Vec<u8>,
    sealed: Vec<u8>,
}

impl Ciphertext {
    /// `None` when the binary is not a ciphertext.
    pub fn parse(binary: &Binary) -> Option<std::result::Result<Self, SourceError>> {
        if binary.subtype != ENCRYPTED_SUBTYPE || binary.bytes.first() == Some(&MARKING_TAG) {
            return None;
        }
        Some(Self::parse_bytes(&binary.bytes))
    }

    fn parse_bytes(bytes: &[u8]) -> std::result::Result<Self, SourceError> {
        let invalid = |reason: &str| SourceError::InvalidCiphertext(reason.to_string());
        if bytes.len() <= HEADER_LEN + IV_LEN {
            return Err(invalid("ciphertext is too short"));
        }
        let algorithm =
            Algorithm::from_byte(bytes[0]).ok_or_else(|| invalid("unknown algorithm byte"))?;
        let key_id = KeyId::from_slice(&bytes[1..1 + KEY_ID_LEN])
            .ok_or_else(|| invalid("truncated key id"))?;
        let type_tag = bytes[1 + KEY_ID_LEN];
        if !(1..=6).contains(&type_tag) {
            return Err(invalid("unknown value type tag"));
        }
        let iv = bytes[HEADER_LEN..HEADER_LEN + IV_LEN].to_vec();
        let sealed = bytes[HEADER_LEN + IV_LEN..].to_vec();
        Ok(Self {
            algorithm,
            key_id,
            type_tag,
            iv,
            sealed,
        })
    }

    fn aad(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(HEADER_LEN);
        aad.push(self.algorithm as u8);
        aad.extend_from_slice(self.key_id.as_bytes());
        aad.push(self.type_tag);
        aad
    }

    pub fn to_binary(&self) -> Binary {
        let mut bytes = self.aad();
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.sealed);
        Binary::new(ENCRYPTED_SUBTYPE, bytes)
    }

    /// Decrypt back to the original value.
    pub fn decrypt(&self, hooks: &dyn CryptoHooks, data_key: &[u8]) -> Result<Value> {
        let plaintext = hooks
            .aead_decrypt(data_key, &self.iv, &self.aad(), &self.sealed)
            .map_err(hook_failed("aead_decrypt"))?;
        let value: Value = serde_json::from_slice(&plaintext).map_err(|e| {
            SourceError::InvalidCiphertext(format!("decrypted value is not JSON: {}", e))
        })?;
        if type_tag(&value) != self.type_tag {
            return Err(SourceError::InvalidCiphertext(
                "decrypted value does not match its recorded type".to_string(),
            )
            .into());
        }
        Ok(value)
    }
}

/// Build a marking binary. Used to author analyzer replies in fixtures.
pub fn marking_value(algorithm: Algorithm, key: &KeyRef, value: Value) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("a".to_string(), Value::from(algorithm as u8));
    match key {
        KeyRef::Id(id) => body.insert("ki".to_string(), id.to_value()),
        KeyRef::AltName(name) => body.insert("ka".to_string(), Value::String(name.clone())),
    };
    body.insert("v".to_string(), value);
    let mut bytes = vec![MARKING_TAG];
    bytes.extend(Value::Object(body).to_string().into_bytes());
    Binary::new(ENCRYPTED_SUBTYPE, bytes).to_value()
}
