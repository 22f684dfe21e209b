//! Constants used throughout fieldcrypt.
//!
//! Centralizes wire-format sizes, binary subtypes and KMS endpoints.

/// Length of a data key and of a local master key (AES-256).
pub const DATA_KEY_LEN: usize = 32;

/// Length of a key identifier (UUID).
pub const KEY_ID_LEN: usize = 16;

/// AEAD IV length.
pub const IV_LEN: usize = 12;

/// Binary subtype of key identifiers.
pub const UUID_SUBTYPE: u8 = 0x04;

/// Binary subtype of markings and ciphertexts.
pub const ENCRYPTED_SUBTYPE: u8 = 0x06;

/// Largest KMS HTTP response accepted, headers included.
pub const MAX_KMS_RESPONSE_LEN: usize = 64 * 1024;

/// Port every KMS endpoint is reached on (TLS).
pub const KMS_PORT: u16 = 443;

/// Default Azure identity platform host.
pub const AZURE_IDENTITY_HOST: &str = "login.microsoftonline.com";

/// Default GCP OAuth host.
pub const GCP_OAUTH_HOST: &str = "oauth2.googleapis.com";

/// Default GCP KMS host.
pub const GCP_KMS_HOST: &str = "cloudkms.googleapis.com";

/// Lifetime requested for GCP JWT assertions, in seconds.
pub const GCP_JWT_LIFETIME_SECS: i64 = 5 * 60;
