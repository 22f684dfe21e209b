//! Error types.
//!
//! Every failure belongs to one of three families that callers must be able
//! to tell apart: protocol misuse by the caller (`ClientError`), malformed
//! data from the database side (`SourceError`), and failed or malformed KMS
//! exchanges (`KmsError`). `ConfigError` only arises in the harness.

use thiserror::Error;

use crate::core::credentials::KmsProvider;
use crate::core::status::{Status, StatusKind};

/// Misuse of the protocol or malformed local input.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("operation already issued: feed a reply and call mark_done first")]
    OperationAlreadyIssued,

    #[error("mark_done called before any reply was fed")]
    NothingFed,

    #[error("a reply was already fed for this phase")]
    UnexpectedReply,

    #[error("invalid namespace: {0:?} (expected <db>.<collection>)")]
    InvalidNamespace(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("unsupported kms provider: {0}")]
    UnsupportedProvider(String),

    #[error("no credentials registered for kms provider {0}")]
    MissingCredentials(KmsProvider),

    #[error("invalid {provider} credentials: {reason}")]
    InvalidCredentials {
        provider: KmsProvider,
        reason: String,
    },

    #[error("null buffer with non-zero length {0}")]
    NullBuffer(usize),

    #[error("{0} kms request(s) still need reply bytes")]
    KmsPending(usize),

    #[error("kms requests were already enumerated and fed")]
    KmsAlreadyEnumerated,

    #[error("kms request already satisfied")]
    KmsSatisfied,

    #[error("crypto hook {hook} failed: {message}")]
    CryptoHook { hook: &'static str, message: String },

    #[error("unknown context state value {0}")]
    UnknownState(u8),
}

impl ClientError {
    fn code(&self) -> u32 {
        match self {
            Self::InvalidState { .. } => 1,
            Self::OperationAlreadyIssued => 2,
            Self::NothingFed => 3,
            Self::UnexpectedReply => 4,
            Self::InvalidNamespace(_) => 5,
            Self::InvalidDocument(_) => 6,
            Self::UnsupportedProvider(_) => 7,
            Self::MissingCredentials(_) => 8,
            Self::InvalidCredentials { .. } => 9,
            Self::NullBuffer(_) => 10,
            Self::KmsPending(_) => 11,
            Self::KmsAlreadyEnumerated => 12,
            Self::KmsSatisfied => 13,
            Self::CryptoHook { .. } => 14,
            Self::UnknownState(_) => 15,
        }
    }
}

/// Malformed documents from the collection-info, markings or key-vault side.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("malformed {phase} reply: {reason}")]
    MalformedReply { phase: &'static str, reason: String },

    #[error("received more than one collection info for {0}")]
    DuplicateCollectionInfo(String),

    #[error("query analysis failed: {0}")]
    MarkingsFailed(String),

    #[error("invalid key document: {0}")]
    InvalidKeyDocument(String),

    #[error("unexpected key document {0}: not requested")]
    UnexpectedKey(String),

    #[error("key not found in key vault: {0}")]
    KeyNotFound(String),

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),
}

impl SourceError {
    fn code(&self) -> u32 {
        match self {
            Self::MalformedReply { .. } => 1,
            Self::DuplicateCollectionInfo(_) => 2,
            Self::MarkingsFailed(_) => 3,
            Self::InvalidKeyDocument(_) => 4,
            Self::UnexpectedKey(_) => 5,
            Self::KeyNotFound(_) => 6,
            Self::InvalidCiphertext(_) => 7,
        }
    }
}

/// Malformed or failed KMS exchange.
#[derive(Error, Debug)]
pub enum KmsError {
    #[error("malformed kms response: {0}")]
    MalformedResponse(String),

    #[error("kms responded with HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("kms response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("fed {got} bytes but only {needed} were needed")]
    TooManyBytes { needed: usize, got: usize },

    #[error("kms response missing field {0}")]
    MissingField(&'static str),

    #[error("{0}")]
    Failed(String),
}

impl KmsError {
    fn code(&self) -> u32 {
        match self {
            Self::MalformedResponse(_) => 1,
            Self::Http { status, .. } => u32::from(*status),
            Self::ResponseTooLarge(_) => 2,
            Self::TooManyBytes { .. } => 3,
            Self::MissingField(_) => 4,
            Self::Failed(_) => 5,
        }
    }
}

/// Harness configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("missing fixture: {0}")]
    MissingFixture(String),
}

/// Top-level error.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A context or KMS request status surfaced as an error.
    #[error("{0}")]
    Status(Status),
}

impl Error {
    /// Status family this error is reported under.
    pub fn kind(&self) -> StatusKind {
        match self {
            Self::Client(_) | Self::Config(_) | Self::Io(_) => StatusKind::ClientError,
            Self::Source(_) => StatusKind::SourceError,
            Self::Kms(_) => StatusKind::KmsError,
            Self::Status(status) => status.kind(),
        }
    }

    /// Stable numeric code within the family.
    pub fn code(&self) -> u32 {
        match self {
            Self::Client(e) => e.code(),
            Self::Source(e) => e.code(),
            Self::Kms(e) => e.code(),
            Self::Config(_) => 100,
            Self::Io(_) => 101,
            Self::Status(status) => status.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
