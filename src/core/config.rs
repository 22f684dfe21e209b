//! Harness configuration file.
//!
//! ```toml
//! schema_map = "schema-map.json"
//!
//! [kms.local]
//! key = "<base64 of 32 bytes>"
//!
//! [kms.aws]
//! access_key_id = "AKIA..."
//! secret_access_key = "..."
//! ```
//!
//! Each `[kms.<provider>]` table becomes that provider's credential payload,
//! with keys converted to camelCase. Paths are relative to the config file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::buffer::Buffer;
use crate::core::client::ClientOptions;
use crate::core::credentials::CredentialEntry;
use crate::error::{ConfigError, Result};

/// Parsed `fieldcrypt.toml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of a JSON schema map document.
    #[serde(default)]
    pub schema_map: Option<PathBuf>,
    /// Credential tables keyed by provider tag.
    #[serde(default)]
    pub kms: BTreeMap<String, toml::Table>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Config {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if the file doesn't exist,
    /// or `ConfigError::Parse` if the TOML is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&contents, base_dir)
    }

    /// Parse configuration text; relative paths resolve against `base_dir`.
    pub fn parse(contents: &str, base_dir: PathBuf) -> Result<Self> {
        let mut config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        config.base_dir = base_dir;
        debug!(providers = config.kms.len(), "config loaded");
        Ok(config)
    }

    /// Credential entries, one per `[kms.*]` table.
    ///
    /// # Errors
    ///
    /// Fails on the first table whose name is not a supported provider.
    pub fn credentials(&self) -> Result<Vec<CredentialEntry>> {
        self.kms
            .iter()
            .map(|(tag, table)| {
                let payload = credential_payload(tag, table)?;
                CredentialEntry::from_tag(tag, &Buffer::wrap(&payload))
            })
            .collect()
    }

    /// Contents of the configured schema map, if any.
    pub fn schema_map(&self) -> Result<Option<Buffer<'static>>> {
        let Some(path) = &self.schema_map else {
            return Ok(None);
        };
        let path = self.base_dir.join(path);
        debug!(path = %path.display(), "reading schema map");
        let bytes = std::fs::read(&path).map_err(|e| ConfigError::InvalidValue {
            field: "schema_map".to_string(),
            reason: format!("{}: {}", path.display(), e),
        })?;
        Ok(Some(Buffer::from_vec(bytes)))
    }

    pub fn client_options(&self) -> Result<ClientOptions> {
        Ok(ClientOptions {
            credentials: self.credentials()?,
            schema_map: self.schema_map()?,
        })
    }
}

/// Serialize a credential table as a camelCase JSON document.
fn credential_payload(tag: &str, table: &toml::Table) -> Result<Vec<u8>> {
    let mut payload = Map::new();
    for (key, value) in table {
        let value = serde_json::to_value(value).map_err(|e| ConfigError::InvalidValue {
            field: format!("kms.{}.{}", tag, key),
            reason: e.to_string(),
        })?;
        payload.insert(camel_case(key), value);
    }
    serde_json::to_vec(&Value::Object(payload)).map_err(|e| {
        ConfigError::InvalidValue {
            field: format!("kms.{}", tag),
            reason: e.to_string(),
        }
        .into()
    })
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
