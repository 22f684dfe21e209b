//! Fieldcrypt - client-side field-level encryption as a state machine.
//!
//! A [`CryptClient`] holds credentials, an optional local schema map and
//! the host's [`CryptoHooks`]. Each encryption or decryption runs in its
//! own [`Context`], which tells the caller what it needs next (collection
//! info, query-analysis markings, key documents, KMS exchanges) and
//! consumes the replies. The caller owns every socket.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface
//! │   ├── replay        # Drive a context from recorded replies
//! │   └── output        # Terminal formatting
//! └── core/             # Core library components
//!     ├── buffer        # Borrowed or owned byte views
//!     ├── status        # Status register (kind, code, message)
//!     ├── hooks/        # Crypto capability trait
//!     │   └── ring      # ring-backed implementation
//!     ├── credentials   # Per-provider KMS credentials
//!     ├── schema        # Namespaces and the local schema map
//!     ├── key_vault     # Key documents and the key broker
//!     ├── fle           # Markings and field ciphertexts
//!     ├── kms/          # KMS request construction and replies
//!     │   ├── http      # Response framing
//!     │   ├── aws       # SigV4 Decrypt
//!     │   ├── azure     # OAuth + unwrapkey
//!     │   └── gcp       # JWT OAuth + decrypt
//!     ├── context/      # The state machine
//!     ├── client        # Shared client configuration
//!     └── config        # fieldcrypt.toml for the replay harness
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fieldcrypt::{Buffer, ClientOptions, CryptClient, RingHooks, State};
//!
//! # fn main() -> fieldcrypt::error::Result<()> {
//! let client = CryptClient::create(Arc::new(RingHooks::new()), ClientOptions::default())?;
//! let mut ctx = client.encrypt_context("test.test");
//! assert_eq!(ctx.state(), State::NeedMongoCollinfo);
//! let filter = ctx.get_operation()?;
//! // run `listCollections` with `filter`, then:
//! ctx.feed(&Buffer::wrap(br#"{"name": "test", "options": {}}"#))?;
//! ctx.mark_done()?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "ring")]
pub mod cli;
pub mod core;
pub mod error;

pub use crate::core::buffer::Buffer;
pub use crate::core::client::{ClientOptions, CryptClient};
pub use crate::core::context::{Context, OperationKind, State};
pub use crate::core::credentials::{CredentialEntry, KmsProvider};
#[cfg(feature = "ring")]
pub use crate::core::hooks::RingHooks;
pub use crate::core::hooks::{CryptoHooks, HookError, HookResult};
pub use crate::core::kms::{KmsRequest, KmsRequestKind};
pub use crate::core::status::{Status, StatusKind};
