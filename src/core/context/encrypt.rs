//! Encryption: schema lookup, query analysis, then marking replacement.

use serde_json::{json, Value};
use tracing::debug;

use super::{invalid_state, State};
use crate::core::constants::ENCRYPTED_SUBTYPE;
use crate::core::document::{self, Document};
use crate::core::fle::Marking;
use crate::core::hooks::CryptoHooks;
use crate::core::key_vault::KeyBroker;
use crate::core::schema::{self, Namespace, SchemaMap};
use crate::error::{ClientError, Error, Result, SourceError};

/// What the query analyzer returned.
struct AnalyzedCommand {
    result: Value,
    has_placeholders: bool,
    schema_requires_encryption: bool,
}

pub(super) struct EncryptOp {
    ns: Namespace,
    schema: Option<Value>,
    remote_schema: bool,
    collinfo_seen: bool,
    analyzed: Option<AnalyzedCommand>,
}

fn malformed(reason: impl Into<String>) -> SourceError {
    SourceError::MalformedReply {
        phase: "markings",
        reason: reason.into(),
    }
}

impl EncryptOp {
    pub fn init(ns: &str, schema_map: Option<&SchemaMap>) -> Result<(Self, State)> {
        let ns = Namespace::parse(ns)?;
        let local = schema_map.and_then(|map| map.get(&ns)).cloned();
        let mut op = Self {
            ns,
            schema: None,
            remote_schema: false,
            collinfo_seen: false,
            analyzed: None,
        };
        let state = match local {
            Some(schema) => {
                debug!(ns = %op.ns, "using schema from the local schema map");
                op.accept_schema(Some(schema), false)
            }
            None => State::NeedMongoCollinfo,
        };
        Ok((op, state))
    }

    fn accept_schema(&mut self, schema: Option<Value>, remote: bool) -> State {
        match schema {
            Some(schema) if schema::requires_encryption(&schema) => {
                self.schema = Some(schema);
                self.remote_schema = remote;
                State::NeedMongoMarkings
            }
            _ => {
                debug!(ns = %self.ns, "schema requires no encryption");
                State::NothingToDo
            }
        }
    }

    pub fn operation(&self, state: State) -> Result<Value> {
        match state {
            State::NeedMongoCollinfo => Ok(json!({ "name": self.ns.coll() })),
            State::NeedMongoMarkings => Ok(json!({
                "jsonSchema": self.schema,
                "isRemoteSchema": self.remote_schema,
            })),
            _ => Err(invalid_state("get_operation", state)),
        }
    }

    pub fn feed(&mut self, state: State, doc: Document, keys: &mut KeyBroker) -> Result<()> {
        match state {
            State::NeedMongoCollinfo => {
                if self.collinfo_seen {
                    return Err(SourceError::DuplicateCollectionInfo(self.ns.to_string()).into());
                }
                self.collinfo_seen = true;
                self.schema = schema::collinfo_schema(&doc)?;
                Ok(())
            }
            State::NeedMongoMarkings => {
                self.analyzed = Some(analyze(doc, keys)?);
                Ok(())
            }
            _ => Err(invalid_state("feed", state)),
        }
    }

    pub fn mark_done(&mut self, state: State) -> Result<State> {
        match state {
            State::NeedMongoCollinfo => {
                let schema = self.schema.take();
                Ok(self.accept_schema(schema, true))
            }
            State::NeedMongoMarkings => {
                let analyzed = self.analyzed.as_ref().ok_or(ClientError::NothingFed)?;
                Ok(if analyzed.has_placeholders {
                    State::NeedMongoKeys
                } else if analyzed.schema_requires_encryption {
                    State::Ready
                } else {
                    State::NothingToDo
                })
            }
            _ => Err(invalid_state("mark_done", state)),
        }
    }

    /// Replace every marking in the analyzed command with its ciphertext.
    pub fn finalize(&self, hooks: &dyn CryptoHooks, keys: &KeyBroker) -> Result<Value> {
        let analyzed = self
            .analyzed
            .as_ref()
            .ok_or_else(|| invalid_state("finalize", State::Ready))?;
        let mut result = analyzed.result.clone();
        document::replace_binaries(&mut result, ENCRYPTED_SUBTYPE, &mut |binary| {
            let marking = match Marking::parse(binary) {
                None => return Ok(binary.to_value()),
                Some(marking) => marking.map_err(malformed)?,
            };
            let (key_id, data_key) = keys
                .material(&marking.key)
                .ok_or_else(|| Error::from(SourceError::KeyNotFound(marking.key.to_string())))?;
            Ok(marking.encrypt(hooks, key_id, data_key)?.to_binary().to_value())
        })?;
        Ok(result)
    }
}

/// Validate a query-analysis reply and request the keys its markings name.
fn analyze(doc: Document, keys: &mut KeyBroker) -> Result<AnalyzedCommand> {
    if let Some(ok) = doc.get("ok") {
        if ok.as_f64() == Some(0.0) || ok.as_bool() == Some(false) {
            let message = doc
                .get("errmsg")
                .and_then(Value::as_str)
                .unwrap_or("query analysis returned ok: 0");
            return Err(SourceError::MarkingsFailed(message.to_string()).into());
        }
    }

    let has_placeholders = doc
        .get("hasEncryptionPlaceholders")
        .and_then(Value::as_bool)
        .ok_or_else(|| malformed("missing boolean \"hasEncryptionPlaceholders\""))?;
    let schema_requires_encryption = match doc.get("schemaRequiresEncryption") {
        None => false,
        Some(value) => value
            .as_bool()
            .ok_or_else(|| malformed("\"schemaRequiresEncryption\" must be a boolean"))?,
    };
    let result = match doc.get("result") {
        Some(result @ Value::Object(_)) => result.clone(),
        _ => return Err(malformed("missing \"result\" document").into()),
    };

    let markings = document::collect_binaries(&result, ENCRYPTED_SUBTYPE)
        .map_err(malformed)?
        .iter()
        .filter_map(Marking::parse)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(malformed)?;
    if has_placeholders == markings.is_empty() {
        return Err(malformed(format!(
            "hasEncryptionPlaceholders is {} but the result holds {} marking(s)",
            has_placeholders,
            markings.len()
        ))
        .into());
    }
    debug!(count = markings.len(), "markings received");
    for marking in markings {
        keys.request(marking.key);
    }

    Ok(AnalyzedCommand {
        result,
        has_placeholders,
        schema_requires_encryption,
    })
}
