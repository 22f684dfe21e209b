//! Test support utilities for fieldcrypt integration tests.
//!
//! Provides deterministic crypto hooks, fixture builders and helpers that
//! drive a context through its phases.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod hooks;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use hooks::*;

use std::sync::Arc;

use fieldcrypt::{Buffer, ClientOptions, Context, CredentialEntry, CryptClient, State};

/// Test environment: a client over stub hooks.
pub struct Test {
    pub hooks: Arc<StubHooks>,
    pub client: CryptClient,
}

impl Test {
    /// A client with local credentials only.
    pub fn new() -> Self {
        Self::with_credentials(vec![local_credentials()])
    }

    pub fn with_credentials(credentials: Vec<CredentialEntry>) -> Self {
        Self::with_options(ClientOptions {
            credentials,
            schema_map: None,
        })
    }

    pub fn with_options(options: ClientOptions) -> Self {
        let hooks = Arc::new(StubHooks::default());
        let client = CryptClient::create(hooks.clone(), options).expect("failed to create client");
        Self { hooks, client }
    }

    /// Encrypt `command` for `test.test` with a local data key, returning
    /// the encrypted command.
    pub fn encrypt_local(&self, key_id: u8, data_key: &[u8], command: serde_json::Value) -> Vec<u8> {
        let mut ctx = self.client.encrypt_context("test.test");
        feed_phase(&mut ctx, State::NeedMongoCollinfo, &[collinfo("test", encrypting_schema())]);
        feed_phase(&mut ctx, State::NeedMongoMarkings, &[markings_reply(command)]);
        feed_phase(
            &mut ctx,
            State::NeedMongoKeys,
            &[local_key_document(self.hooks.as_ref(), key_id, data_key)],
        );
        assert_state(&ctx, State::Ready);
        ctx.finalize().expect("finalize failed").into_vec()
    }
}

impl Default for Test {
    fn default() -> Self {
        Self::new()
    }
}

/// Issue the operation for `state`, feed `replies` and mark the phase done.
pub fn feed_phase(ctx: &mut Context, state: State, replies: &[Vec<u8>]) {
    assert_state(ctx, state);
    ctx.get_operation().expect("get_operation failed");
    for reply in replies {
        ctx.feed(&Buffer::wrap(reply)).expect("feed failed");
    }
    ctx.mark_done().expect("mark_done failed");
}

/// Answer every outstanding KMS request from `reply_for` and mark the round done.
pub fn answer_kms(ctx: &mut Context, mut reply_for: impl FnMut(&fieldcrypt::KmsRequest) -> Vec<u8>) {
    assert_state(ctx, State::NeedKms);
    for request in ctx.kms_requests().expect("kms_requests failed") {
        let reply = reply_for(request);
        request.feed(&Buffer::wrap(&reply)).expect("kms feed failed");
        assert_eq!(request.bytes_needed(), 0);
    }
    ctx.mark_kms_done().expect("mark_kms_done failed");
}
