//! KMS providers and per-provider credential material.
//!
//! The provider set is closed: local, AWS, Azure and GCP. Untyped input
//! (tags from configuration files or foreign callers) is validated when the
//! entry is constructed, never later.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::core::buffer::Buffer;
use crate::core::constants::DATA_KEY_LEN;
use crate::error::{ClientError, Error, Result};

/// Supported KMS providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum KmsProvider {
    Local = 0,
    Aws = 1,
    Azure = 2,
    Gcp = 3,
}

impl KmsProvider {
    /// Every supported provider.
    pub const ALL: [KmsProvider; 4] = [Self::Local, Self::Aws, Self::Azure, Self::Gcp];

    /// Provider tag as used in key documents and configuration.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
        }
    }

    /// Parse a provider tag.
    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == tag)
            .ok_or_else(|| ClientError::UnsupportedProvider(tag.to_string()).into())
    }
}

impl FromStr for KmsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s)
    }
}

impl TryFrom<u8> for KmsProvider {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| *p as u8 == value)
            .ok_or_else(|| ClientError::UnsupportedProvider(format!("#{}", value)).into())
    }
}

impl fmt::Display for KmsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Credential material for one provider.
///
/// The payload is an opaque document; it is only interpreted when a KMS
/// request for this provider has to be built.
#[derive(Clone)]
pub struct CredentialEntry {
    provider: KmsProvider,
    payload: Zeroizing<Vec<u8>>,
}

impl CredentialEntry {
    /// Copy `payload` into a new entry.
    pub fn new(provider: KmsProvider, payload: &Buffer<'_>) -> Self {
        Self {
            provider,
            payload: Zeroizing::new(payload.to_owned_bytes()),
        }
    }

    /// Build an entry from an untyped provider tag, failing fast when the
    /// tag is not a supported provider.
    pub fn from_tag(tag: &str, payload: &Buffer<'_>) -> Result<Self> {
        let provider = KmsProvider::from_tag(tag)?;
        Ok(Self::new(provider, payload))
    }

    pub fn provider(&self) -> KmsProvider {
        self.provider
    }

    pub fn payload(&self) -> Buffer<'_> {
        Buffer::wrap(&self.payload)
    }

    /// Check the payload has the shape its provider expects.
    pub(crate) fn validate(&self) -> Result<()> {
        match self.provider {
            KmsProvider::Local => self.local_key().map(drop),
            KmsProvider::Aws => self.aws().map(drop),
            KmsProvider::Azure => self.azure().map(drop),
            KmsProvider::Gcp => self.gcp().map(drop),
        }
    }

    fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| self.invalid(e.to_string()))
    }

    fn invalid(&self, reason: impl Into<String>) -> Error {
        ClientError::InvalidCredentials {
            provider: self.provider,
            reason: reason.into(),
        }
        .into()
    }

    /// The local master key.
    pub(crate) fn local_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        let creds: LocalCredentials = self.parse()?;
        let key = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(creds.key.as_bytes())
                .map_err(|e| self.invalid(format!("key is not base64: {}", e)))?,
        );
        if key.len() != DATA_KEY_LEN {
            return Err(self.invalid(format!(
                "local master key must be {} bytes, got {}",
                DATA_KEY_LEN,
                key.len()
            )));
        }
        Ok(key)
    }

    pub(crate) fn aws(&self) -> Result<AwsCredentials> {
        self.parse()
    }

    pub(crate) fn azure(&self) -> Result<AzureCredentials> {
        self.parse()
    }

    pub(crate) fn gcp(&self) -> Result<GcpCredentials> {
        let creds: GcpCredentials = self.parse()?;
        base64::engine::general_purpose::STANDARD
            .decode(creds.private_key.as_bytes())
            .map_err(|e| self.invalid(format!("privateKey is not base64: {}", e)))?;
        Ok(creds)
    }
}

impl fmt::Debug for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialEntry")
            .field("provider", &self.provider)
            .field("payload", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LocalCredentials {
    key: Zeroizing<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: Zeroizing<String>,
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AzureCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    #[serde(default)]
    pub identity_platform_endpoint: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GcpCredentials {
    pub email: String,
    pub private_key: Zeroizing<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl GcpCredentials {
    /// DER bytes of the PKCS#8 private key.
    pub(crate) fn private_key_der(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(self.private_key.as_bytes())
                .unwrap_or_default(),
        )
    }
}

/// Credentials keyed by provider. Registering a provider twice overwrites.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: BTreeMap<KmsProvider, CredentialEntry>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: CredentialEntry) -> Option<CredentialEntry> {
        self.entries.insert(entry.provider, entry)
    }

    pub fn get(&self, provider: KmsProvider) -> Option<&CredentialEntry> {
        self.entries.get(&provider)
    }

    /// Credentials for `provider`, or a `MissingCredentials` error.
    pub(crate) fn require(&self, provider: KmsProvider) -> Result<&CredentialEntry> {
        self.get(provider)
            .ok_or_else(|| ClientError::MissingCredentials(provider).into())
    }

    pub fn providers(&self) -> impl Iterator<Item = KmsProvider> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
