//! Single-slot status register.
//!
//! Contexts and KMS requests each own one `Status`. A failing operation
//! overwrites it, so callers read it before taking the next action.

use std::fmt;

use crate::error::Error;

/// Family of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// Success.
    None,
    /// Malformed document from the database side.
    SourceError,
    /// Malformed or failed KMS exchange.
    KmsError,
    /// Protocol misuse or malformed local input.
    ClientError,
}

impl StatusKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SourceError => "source error",
            Self::KmsError => "kms error",
            Self::ClientError => "client error",
        }
    }
}

/// A `(kind, code, message)` descriptor.
///
/// A non-success status always carries a non-empty message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    kind: StatusKind,
    code: u32,
    message: String,
}

impl Status {
    /// The success status.
    pub fn ok() -> Self {
        Self {
            kind: StatusKind::None,
            code: 0,
            message: String::new(),
        }
    }

    /// Build a status. An empty message on a failure kind is replaced.
    pub fn new(kind: StatusKind, code: u32, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if kind != StatusKind::None && message.is_empty() {
            message = format!("unspecified {}", kind.name());
        }
        Self {
            kind,
            code,
            message,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == StatusKind::None
    }

    pub fn kind(&self) -> StatusKind {
        self.kind
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn set(&mut self, err: &Error) {
        *self = Self::from(err);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::ok();
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        Self::new(err.kind(), err.code(), err.to_string())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "ok")
        } else {
            write!(f, "{} {}: {}", self.kind.name(), self.code, self.message)
        }
    }
}
