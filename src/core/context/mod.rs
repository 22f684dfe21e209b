//! The per-operation state machine.
//!
//! A context drives exactly one encryption or decryption. It never performs
//! I/O: in the `NEED_MONGO_*` states it hands out a request document and
//! waits for replies, in `NEED_KMS` it hands out [`KmsRequest`]s, and in
//! `READY` it performs the transform through the client's crypto hooks.
//!
//! ```text
//! NEED_MONGO_COLLINFO -> NEED_MONGO_MARKINGS -> NEED_MONGO_KEYS -> NEED_KMS -> READY -> DONE
//! ```
//!
//! Decryption skips the markings phase. `NOTHING_TO_DO` and `ERROR` are
//! terminal alternatives.
//!
//! ## Failure policy
//!
//! - Calls that are invalid for the current state fail with a
//!   `ClientError` and leave the state unchanged.
//! - Malformed replies, missing keys and failed KMS exchanges move the
//!   context to `ERROR`. Nothing is retried.

mod decrypt;
mod encrypt;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::core::buffer::Buffer;
use crate::core::client::ClientConfig;
use crate::core::credentials::KmsProvider;
use crate::core::document;
use crate::core::key_vault::{self, KeyBroker, KeyDocument};
use crate::core::kms::{self, KmsOutcome, KmsRequest, TokenCache};
use crate::core::status::Status;
use crate::error::{ClientError, Error, KmsError, Result, SourceError};

use self::decrypt::DecryptOp;
use self::encrypt::EncryptOp;

/// Context states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Error = 0,
    NeedMongoCollinfo = 1,
    NeedMongoMarkings = 2,
    NeedMongoKeys = 3,
    NeedKms = 4,
    Ready = 5,
    Done = 6,
    NothingToDo = 7,
}

impl State {
    pub const ALL: [State; 8] = [
        Self::Error,
        Self::NeedMongoCollinfo,
        Self::NeedMongoMarkings,
        Self::NeedMongoKeys,
        Self::NeedKms,
        Self::Ready,
        Self::Done,
        Self::NothingToDo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::NeedMongoCollinfo => "NEED_MONGO_COLLINFO",
            Self::NeedMongoMarkings => "NEED_MONGO_MARKINGS",
            Self::NeedMongoKeys => "NEED_MONGO_KEYS",
            Self::NeedKms => "NEED_KMS",
            Self::Ready => "READY",
            Self::Done => "DONE",
            Self::NothingToDo => "NOTHING_TO_DO",
        }
    }

    /// `DONE`, `NOTHING_TO_DO` and `ERROR` never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Done | Self::NothingToDo)
    }

    fn phase(&self) -> &'static str {
        match self {
            Self::NeedMongoCollinfo => "collection info",
            Self::NeedMongoMarkings => "markings",
            Self::NeedMongoKeys => "key vault",
            _ => "unexpected",
        }
    }
}

impl TryFrom<u8> for State {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|s| *s as u8 == value)
            .ok_or_else(|| ClientError::UnknownState(value).into())
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which transform a context performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Encrypt,
    Decrypt,
}

enum Operation {
    Encrypt(EncryptOp),
    Decrypt(DecryptOp),
    Invalid,
}

fn invalid_state(operation: &'static str, state: State) -> Error {
    ClientError::InvalidState {
        operation,
        state: state.name(),
    }
    .into()
}

/// One in-flight encryption or decryption.
pub struct Context {
    config: Arc<ClientConfig>,
    kind: OperationKind,
    state: State,
    status: Status,
    op: Operation,
    issued: bool,
    fed: usize,
    keys: KeyBroker,
    kms: Vec<KmsRequest>,
    tokens: TokenCache,
}

impl Context {
    fn new(config: Arc<ClientConfig>, kind: OperationKind) -> Self {
        Self {
            config,
            kind,
            state: State::Error,
            status: Status::ok(),
            op: Operation::Invalid,
            issued: false,
            fed: 0,
            keys: KeyBroker::default(),
            kms: Vec::new(),
            tokens: TokenCache::default(),
        }
    }

    fn start(mut self, init: Result<(Operation, State)>) -> Self {
        match init {
            Ok((op, state)) => {
                self.op = op;
                self.state = state;
                debug!(kind = ?self.kind, state = %state, "context initialized");
            }
            Err(err) => {
                warn!(kind = ?self.kind, error = %err, "context initialization failed");
                self.status.set(&err);
            }
        }
        self
    }

    pub(crate) fn encrypt(config: Arc<ClientConfig>, ns: &str) -> Self {
        let init = EncryptOp::init(ns, config.schema_map.as_ref())
            .map(|(op, state)| (Operation::Encrypt(op), state));
        Self::new(config, OperationKind::Encrypt).start(init)
    }

    pub(crate) fn decrypt(config: Arc<ClientConfig>, document: &Buffer<'_>) -> Self {
        let mut ctx = Self::new(config, OperationKind::Decrypt);
        let init = DecryptOp::init(
            document.data(),
            &mut ctx.keys,
            ctx.config.schema_map.is_some(),
        )
        .map(|(op, state)| (Operation::Decrypt(op), state));
        ctx.start(init)
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The status register. Holds the detail of the last failure.
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// The request document for the current `NEED_MONGO_*` phase.
    ///
    /// May be called once per phase.
    pub fn get_operation(&mut self) -> Result<Buffer<'static>> {
        self.expect_mongo_state("get_operation")?;
        if self.issued {
            return self.violation(ClientError::OperationAlreadyIssued.into());
        }
        let result = match self.state {
            State::NeedMongoKeys => Ok(self.keys.filter()),
            state => match &self.op {
                Operation::Encrypt(op) => op.operation(state),
                Operation::Decrypt(op) => op.operation(state),
                Operation::Invalid => Err(invalid_state("get_operation", state)),
            },
        }
        .and_then(|doc| document::to_bytes(&doc));
        let bytes = self.settle(result)?;
        self.issued = true;
        trace!(state = %self.state, len = bytes.len(), "operation issued");
        Ok(Buffer::from_vec(bytes))
    }

    /// Accept one reply document for the current phase.
    ///
    /// The bytes are parsed before this returns; the buffer is not retained.
    pub fn feed(&mut self, reply: &Buffer<'_>) -> Result<()> {
        self.expect_mongo_state("feed")?;
        if self.state == State::NeedMongoMarkings && self.fed > 0 {
            return self.violation(ClientError::UnexpectedReply.into());
        }
        trace!(state = %self.state, len = reply.len(), "reply fed");
        let result = self.feed_reply(reply.data());
        self.settle(result)?;
        self.fed += 1;
        Ok(())
    }

    fn feed_reply(&mut self, bytes: &[u8]) -> Result<()> {
        let state = self.state;
        let doc = document::parse(bytes).map_err(|reason| SourceError::MalformedReply {
            phase: state.phase(),
            reason,
        })?;
        if state == State::NeedMongoKeys {
            return self.keys.add_document(&doc);
        }
        match &mut self.op {
            Operation::Encrypt(op) => op.feed(state, doc, &mut self.keys),
            Operation::Decrypt(op) => op.feed(state, doc),
            Operation::Invalid => Err(invalid_state("feed", state)),
        }
    }

    /// Declare the current phase complete and advance.
    pub fn mark_done(&mut self) -> Result<()> {
        self.expect_mongo_state("mark_done")?;
        if self.state == State::NeedMongoMarkings && self.fed == 0 {
            return self.violation(ClientError::NothingFed.into());
        }
        let result = self.finish_phase();
        let next = self.settle(result)?;
        self.transition(next);
        Ok(())
    }

    fn finish_phase(&mut self) -> Result<State> {
        let state = self.state;
        if state == State::NeedMongoKeys {
            return self.finish_keys();
        }
        match &mut self.op {
            Operation::Encrypt(op) => op.mark_done(state),
            Operation::Decrypt(op) => op.mark_done(state),
            Operation::Invalid => Err(invalid_state("mark_done", state)),
        }
    }

    fn finish_keys(&mut self) -> Result<State> {
        self.keys.check_satisfied()?;
        self.unwrap_local_keys()?;
        self.next_kms_round()
    }

    fn unwrap_local_keys(&mut self) -> Result<()> {
        let local: Vec<KeyDocument> = self
            .keys
            .pending()
            .filter(|doc| doc.master_key().provider() == KmsProvider::Local)
            .cloned()
            .collect();
        if local.is_empty() {
            return Ok(());
        }
        let master = self
            .config
            .credentials
            .require(KmsProvider::Local)?
            .local_key()?;
        for doc in local {
            let data_key = key_vault::unwrap_local_key(self.config.hooks.as_ref(), &master, &doc)?;
            debug!(key_id = %doc.id(), "unwrapped local data key");
            self.keys.set_material(doc.id(), data_key)?;
        }
        Ok(())
    }

    fn next_kms_round(&mut self) -> Result<State> {
        let requests = kms::plan_requests(
            self.config.hooks.as_ref(),
            &self.config.credentials,
            self.keys.pending(),
            &self.tokens,
            Utc::now(),
        )?;
        if requests.is_empty() {
            return Ok(State::Ready);
        }
        debug!(count = requests.len(), "kms round planned");
        self.kms = requests;
        Ok(State::NeedKms)
    }

    /// The outstanding KMS requests.
    ///
    /// May be enumerated again only while none of them has been fed.
    pub fn kms_requests(&mut self) -> Result<std::slice::IterMut<'_, KmsRequest>> {
        if self.state != State::NeedKms {
            return self.violation(invalid_state("enumerate kms requests", self.state));
        }
        if self.kms.iter().any(KmsRequest::was_fed) {
            return self.violation(ClientError::KmsAlreadyEnumerated.into());
        }
        Ok(self.kms.iter_mut())
    }

    /// Declare every KMS request satisfied and advance.
    pub fn mark_kms_done(&mut self) -> Result<()> {
        if self.state != State::NeedKms {
            return self.violation(invalid_state("mark_kms_done", self.state));
        }
        let pending = self.kms.iter().filter(|r| r.bytes_needed() > 0).count();
        if pending > 0 {
            return self.violation(ClientError::KmsPending(pending).into());
        }
        let result = self.finish_kms_round();
        let next = self.settle(result)?;
        self.transition(next);
        Ok(())
    }

    fn finish_kms_round(&mut self) -> Result<State> {
        if let Some(failed) = self
            .kms
            .iter()
            .find(|r| r.has_failed() || !r.status().is_ok())
        {
            return Err(KmsError::Failed(format!(
                "{} request to {} failed: {}",
                failed.kind(),
                failed.endpoint(),
                failed.status().message()
            ))
            .into());
        }
        for mut request in std::mem::take(&mut self.kms) {
            match request.take_outcome() {
                Some(KmsOutcome::Token(provider, token)) => {
                    debug!(provider = %provider, "oauth token acquired");
                    self.tokens.insert(provider, token);
                }
                Some(KmsOutcome::DataKey(id, data_key)) => {
                    debug!(key_id = %id, provider = %request.provider(), "data key unwrapped");
                    self.keys.set_material(id, data_key)?;
                }
                None => {
                    return Err(KmsError::Failed(format!(
                        "{} request completed without a result",
                        request.kind()
                    ))
                    .into())
                }
            }
        }
        self.next_kms_round()
    }

    /// Perform the transform and return the resulting document.
    pub fn finalize(&mut self) -> Result<Buffer<'static>> {
        if self.state != State::Ready {
            return self.violation(invalid_state("finalize", self.state));
        }
        let hooks = self.config.hooks.as_ref();
        let result = match &self.op {
            Operation::Encrypt(op) => op.finalize(hooks, &self.keys),
            Operation::Decrypt(op) => op.finalize(hooks, &self.keys),
            Operation::Invalid => Err(invalid_state("finalize", self.state)),
        }
        .and_then(|doc: Value| document::to_bytes(&doc));
        let bytes = self.settle(result)?;
        self.transition(State::Done);
        Ok(Buffer::from_vec(bytes))
    }

    fn expect_mongo_state(&mut self, operation: &'static str) -> Result<()> {
        match self.state {
            State::NeedMongoCollinfo | State::NeedMongoMarkings | State::NeedMongoKeys => Ok(()),
            state => self.violation(invalid_state(operation, state)),
        }
    }

    /// Reject a call without changing state. In `ERROR` the original
    /// failure stays in the status register.
    fn violation<T>(&mut self, err: Error) -> Result<T> {
        warn!(state = %self.state, error = %err, "protocol violation");
        if self.state != State::Error {
            self.status.set(&err);
        }
        Err(err)
    }

    /// Record the outcome of a step; failures are fatal.
    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.status.clear();
                Ok(value)
            }
            Err(err) => {
                warn!(state = %self.state, error = %err, "context failed");
                self.status.set(&err);
                self.transition(State::Error);
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: State) {
        debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.issued = false;
        self.fed = 0;
        if next != State::NeedKms {
            self.kms.clear();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("status", &self.status)
            .field("kms_requests", &self.kms.len())
            .finish()
    }
}
