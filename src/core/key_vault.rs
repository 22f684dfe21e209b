//! Key-vault documents and the per-context key broker.
//!
//! The broker records which data keys a context needs, builds the key-vault
//! filter, accepts key documents as they are fed and holds the unwrapped
//! key material until finalize.

use std::fmt;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::core::constants::{DATA_KEY_LEN, IV_LEN, KEY_ID_LEN, UUID_SUBTYPE};
use crate::core::credentials::KmsProvider;
use crate::core::document::{self, Binary, Document};
use crate::core::hooks::{hook_failed, CryptoHooks};
use crate::error::{Result, SourceError};

/// A 16-byte data key identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(Uuid);

impl KeyId {
    pub fn new(bytes: [u8; KEY_ID_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        self.0.as_bytes()
    }

    /// Extended JSON binary with the UUID subtype.
    pub fn to_value(&self) -> Value {
        Binary::new(UUID_SUBTYPE, self.0.as_bytes().to_vec()).to_value()
    }

    pub(crate) fn from_value(value: &Value) -> std::result::Result<Self, String> {
        let binary = Binary::from_value(value).ok_or("key id must be a binary")??;
        if binary.subtype != UUID_SUBTYPE {
            return Err(format!(
                "key id must have subtype {:02x}, got {:02x}",
                UUID_SUBTYPE, binary.subtype
            ));
        }
        Self::from_slice(&binary.bytes)
            .ok_or_else(|| format!("key id must be {} bytes", KEY_ID_LEN))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

/// How a marking names its data key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    Id(KeyId),
    AltName(String),
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::AltName(name) => write!(f, "altname {:?}", name),
        }
    }
}

/// Where a data key's wrapping key lives.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum MasterKey {
    Local,
    Aws {
        region: String,
        key: String,
        #[serde(default)]
        endpoint: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Azure {
        key_vault_endpoint: String,
        key_name: String,
        #[serde(default)]
        key_version: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Gcp {
        project_id: String,
        location: String,
        key_ring: String,
        key_name: String,
        #[serde(default)]
        key_version: Option<String>,
        #[serde(default)]
        endpoint: Option<String>,
    },
}

impl MasterKey {
    pub fn provider(&self) -> KmsProvider {
        match self {
            Self::Local => KmsProvider::Local,
            Self::Aws { .. } => KmsProvider::Aws,
            Self::Azure { .. } => KmsProvider::Azure,
            Self::Gcp { .. } => KmsProvider::Gcp,
        }
    }
}

/// A parsed key-vault document.
#[derive(Debug, Clone)]
pub struct KeyDocument {
    id: KeyId,
    alt_names: Vec<String>,
    key_material: Vec<u8>,
    master_key: MasterKey,
}

impl KeyDocument {
    pub(crate) fn parse(doc: &Document) -> std::result::Result<Self, SourceError> {
        let invalid = |reason: String| SourceError::InvalidKeyDocument(reason);

        let id = KeyId::from_value(doc.get("_id").ok_or_else(|| invalid("missing _id".into()))?)
            .map_err(invalid)?;

        let alt_names = match doc.get("keyAltNames") {
            None => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid("keyAltNames must be strings".into()))
                })
                .collect::<std::result::Result<_, _>>()?,
            Some(_) => return Err(invalid("keyAltNames must be an array".into())),
        };

        let material = doc
            .get("keyMaterial")
            .ok_or_else(|| invalid("missing keyMaterial".into()))?;
        let key_material = Binary::from_value(material)
            .ok_or_else(|| invalid("keyMaterial must be a binary".into()))?
            .map_err(invalid)?
            .bytes;

        let master_key = doc
            .get("masterKey")
            .ok_or_else(|| invalid("missing masterKey".into()))?;
        let master_key = MasterKey::deserialize(master_key)
            .map_err(|e| invalid(format!("invalid masterKey: {}", e)))?;

        Ok(Self {
            id,
            alt_names,
            key_material,
            master_key,
        })
    }

    pub fn id(&self) -> KeyId {
        self.id
    }

    pub fn alt_names(&self) -> &[String] {
        &self.alt_names
    }

    pub fn key_material(&self) -> &[u8] {
        &self.key_material
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    fn matches(&self, key: &KeyRef) -> bool {
        match key {
            KeyRef::Id(id) => self.id == *id,
            KeyRef::AltName(name) => self.alt_names.iter().any(|n| n == name),
        }
    }
}

/// Seal a data key under a local master key, producing `keyMaterial`.
///
/// Layout: `[ iv (12 bytes) ][ aead ciphertext + tag ]`.
pub fn wrap_local_key(
    hooks: &dyn CryptoHooks,
    master_key: &[u8],
    data_key: &[u8],
) -> Result<Vec<u8>> {
    let iv = hooks.random(IV_LEN).map_err(hook_failed("random"))?;
    let sealed = hooks
        .aead_encrypt(master_key, &iv, &[], data_key)
        .map_err(hook_failed("aead_encrypt"))?;
    let mut out = iv;
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open `keyMaterial` sealed by [`wrap_local_key`].
pub(crate) fn unwrap_local_key(
    hooks: &dyn CryptoHooks,
    master_key: &[u8],
    doc: &KeyDocument,
) -> Result<Zeroizing<Vec<u8>>> {
    let material = doc.key_material();
    if material.len() <= IV_LEN {
        return Err(SourceError::InvalidKeyDocument(format!(
            "keyMaterial of {} is too short",
            doc.id()
        ))
        .into());
    }
    let (iv, sealed) = material.split_at(IV_LEN);
    let data_key = Zeroizing::new(
        hooks
            .aead_decrypt(master_key, iv, &[], sealed)
            .map_err(hook_failed("aead_decrypt"))?,
    );
    check_data_key_len(doc.id(), &data_key)?;
    Ok(data_key)
}

pub(crate) fn check_data_key_len(id: KeyId, data_key: &[u8]) -> Result<()> {
    if data_key.len() != DATA_KEY_LEN {
        return Err(SourceError::InvalidKeyDocument(format!(
            "data key {} must be {} bytes, got {}",
            id,
            DATA_KEY_LEN,
            data_key.len()
        ))
        .into());
    }
    Ok(())
}

struct KeyEntry {
    doc: KeyDocument,
    material: Option<Zeroizing<Vec<u8>>>,
}

/// Keys one context needs, and what has been learned about them.
#[derive(Default)]
pub(crate) struct KeyBroker {
    requested: Vec<KeyRef>,
    entries: Vec<KeyEntry>,
}

impl KeyBroker {
    pub fn request(&mut self, key: KeyRef) {
        if !self.requested.contains(&key) {
            trace!(key = %key, "requesting key");
            self.requested.push(key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requested.is_empty()
    }

    /// Key-vault filter selecting every requested key.
    pub fn filter(&self) -> Value {
        let ids: Vec<Value> = self
            .requested
            .iter()
            .filter_map(|k| match k {
                KeyRef::Id(id) => Some(id.to_value()),
                KeyRef::AltName(_) => None,
            })
            .collect();
        let names: Vec<Value> = self
            .requested
            .iter()
            .filter_map(|k| match k {
                KeyRef::AltName(name) => Some(Value::String(name.clone())),
                KeyRef::Id(_) => None,
            })
            .collect();

        let mut clauses = Vec::new();
        if !ids.is_empty() {
            clauses.push(json!({"_id": {"$in": ids}}));
        }
        if !names.is_empty() {
            clauses.push(json!({"keyAltNames": {"$in": names}}));
        }
        json!({ "$or": clauses })
    }

    /// Accept one key document from the key vault.
    pub fn add_document(&mut self, doc: &Document) -> Result<()> {
        let key = KeyDocument::parse(doc)?;
        if !self.requested.iter().any(|r| key.matches(r)) {
            return Err(SourceError::UnexpectedKey(key.id().to_string()).into());
        }
        if self.entries.iter().any(|e| e.doc.id() == key.id()) {
            debug!(key_id = %key.id(), "ignoring duplicate key document");
            return Ok(());
        }
        debug!(key_id = %key.id(), provider = %key.master_key().provider(), "key document accepted");
        self.entries.push(KeyEntry {
            doc: key,
            material: None,
        });
        Ok(())
    }

    /// Fail unless every requested key has a document.
    pub fn check_satisfied(&self) -> Result<()> {
        for key in &self.requested {
            if !self.entries.iter().any(|e| e.doc.matches(key)) {
                return Err(SourceError::KeyNotFound(key.to_string()).into());
            }
        }
        Ok(())
    }

    /// Documents whose key material is still wrapped.
    pub fn pending(&self) -> impl Iterator<Item = &KeyDocument> {
        self.entries
            .iter()
            .filter(|e| e.material.is_none())
            .map(|e| &e.doc)
    }

    pub fn set_material(&mut self, id: KeyId, material: Zeroizing<Vec<u8>>) -> Result<()> {
        check_data_key_len(id, &material)?;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.doc.id() == id) {
            entry.material = Some(material);
        }
        Ok(())
    }

    /// Unwrapped material for `key`, with the id it resolved to.
    pub fn material(&self, key: &KeyRef) -> Option<(KeyId, &[u8])> {
        self.entries
            .iter()
            .find(|e| e.doc.matches(key))
            .and_then(|e| e.material.as_ref().map(|m| (e.doc.id(), m.as_slice())))
    }
}
