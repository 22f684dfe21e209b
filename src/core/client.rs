//! The session root that spawns contexts.
//!
//! A `CryptClient` owns the crypto hooks, the credential store and the
//! schema map. Every context takes a snapshot of that configuration when it
//! is spawned; later changes on the client never reach it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::core::buffer::Buffer;
use crate::core::context::Context;
use crate::core::credentials::{CredentialEntry, CredentialStore};
use crate::core::hooks::CryptoHooks;
use crate::core::schema::SchemaMap;
use crate::error::Result;

/// Construction options for [`CryptClient::create`].
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Credentials per KMS provider. Later entries overwrite earlier ones.
    pub credentials: Vec<CredentialEntry>,
    /// Serialized `{"<db>.<coll>": <schema>}` document.
    pub schema_map: Option<Buffer<'static>>,
}

/// Configuration shared read-only by the client and its contexts.
#[derive(Debug, Clone)]
pub(crate) struct ClientConfig {
    pub hooks: Arc<dyn CryptoHooks>,
    pub credentials: CredentialStore,
    pub schema_map: Option<SchemaMap>,
}

/// Factory for encryption and decryption contexts.
#[derive(Debug, Clone)]
pub struct CryptClient {
    config: Arc<ClientConfig>,
}

impl CryptClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidCredentials` if a credential payload does
    /// not match its provider, or `ClientError::InvalidDocument` if the
    /// schema map cannot be parsed. No client is created in either case.
    pub fn create(hooks: Arc<dyn CryptoHooks>, options: ClientOptions) -> Result<Self> {
        let mut credentials = CredentialStore::new();
        for entry in options.credentials {
            entry.validate()?;
            credentials.insert(entry);
        }
        let schema_map = options
            .schema_map
            .as_ref()
            .map(SchemaMap::parse)
            .transpose()?;

        info!(
            providers = credentials.len(),
            schemas = schema_map.as_ref().map_or(0, SchemaMap::len),
            "crypt client created"
        );
        Ok(Self {
            config: Arc::new(ClientConfig {
                hooks,
                credentials,
                schema_map,
            }),
        })
    }

    /// Register or replace credentials for one provider.
    ///
    /// Contexts spawned earlier keep the credentials they started with.
    pub fn register_credentials(&mut self, entry: CredentialEntry) -> Result<()> {
        entry.validate()?;
        debug!(provider = %entry.provider(), "registering credentials");
        Arc::make_mut(&mut self.config).credentials.insert(entry);
        Ok(())
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.config.credentials
    }

    pub fn has_schema_map(&self) -> bool {
        self.config.schema_map.is_some()
    }

    /// Spawn a context that encrypts a command against namespace `ns`.
    pub fn encrypt_context(&self, ns: &str) -> Context {
        Context::encrypt(Arc::clone(&self.config), ns)
    }

    /// Spawn a context that decrypts `document`.
    ///
    /// The document is copied; the caller's buffer may be dropped afterwards.
    pub fn decrypt_context(&self, document: &Buffer<'_>) -> Context {
        Context::decrypt(Arc::clone(&self.config), document)
    }
}
