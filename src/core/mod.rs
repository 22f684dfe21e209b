//! Core library components.
//!
//! This module contains the engine: the context state machine, the key
//! broker, KMS request construction and the field ciphertext format. None
//! of it performs network or database I/O.

pub mod buffer;
pub mod client;
pub mod config;
pub mod constants;
pub mod context;
pub mod credentials;
pub(crate) mod document;
pub mod fle;
pub mod hooks;
pub mod key_vault;
pub mod kms;
pub mod schema;
pub mod status;
