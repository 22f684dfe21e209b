//! Decryption: key lookup, then ciphertext replacement.

use serde_json::{json, Value};
use tracing::debug;

use super::{invalid_state, State};
use crate::core::constants::ENCRYPTED_SUBTYPE;
use crate::core::document::{self, Document};
use crate::core::fle::Ciphertext;
use crate::core::hooks::CryptoHooks;
use crate::core::key_vault::{KeyBroker, KeyRef};
use crate::core::schema;
use crate::error::{ClientError, Error, Result, SourceError};

pub(super) struct DecryptOp {
    document: Value,
    collections: usize,
}

impl DecryptOp {
    /// Scan `bytes` for ciphertexts and request their keys.
    pub fn init(bytes: &[u8], keys: &mut KeyBroker, has_schema_map: bool) -> Result<(Self, State)> {
        let document = Value::Object(document::parse(bytes).map_err(ClientError::InvalidDocument)?);
        let binaries = document::collect_binaries(&document, ENCRYPTED_SUBTYPE)
            .map_err(ClientError::InvalidDocument)?;

        let mut ciphertexts = 0;
        for binary in &binaries {
            if let Some(ciphertext) = Ciphertext::parse(binary) {
                keys.request(KeyRef::Id(ciphertext?.key_id));
                ciphertexts += 1;
            }
        }
        debug!(ciphertexts, "scanned document for decryption");

        let state = if ciphertexts == 0 {
            State::NothingToDo
        } else if has_schema_map {
            State::NeedMongoKeys
        } else {
            State::NeedMongoCollinfo
        };
        Ok((
            Self {
                document,
                collections: 0,
            },
            state,
        ))
    }

    pub fn operation(&self, state: State) -> Result<Value> {
        match state {
            State::NeedMongoCollinfo => {
                Ok(json!({ "options.validator.$jsonSchema": { "$exists": true } }))
            }
            _ => Err(invalid_state("get_operation", state)),
        }
    }

    /// Collection infos are only checked for shape.
    pub fn feed(&mut self, state: State, doc: Document) -> Result<()> {
        match state {
            State::NeedMongoCollinfo => {
                schema::collinfo_schema(&doc)?;
                self.collections += 1;
                Ok(())
            }
            _ => Err(invalid_state("feed", state)),
        }
    }

    pub fn mark_done(&mut self, state: State) -> Result<State> {
        match state {
            State::NeedMongoCollinfo => {
                debug!(collections = self.collections, "collection info complete");
                Ok(State::NeedMongoKeys)
            }
            _ => Err(invalid_state("mark_done", state)),
        }
    }

    /// Replace every ciphertext with its plaintext value.
    pub fn finalize(&self, hooks: &dyn CryptoHooks, keys: &KeyBroker) -> Result<Value> {
        let mut document = self.document.clone();
        document::replace_binaries(&mut document, ENCRYPTED_SUBTYPE, &mut |binary| {
            let ciphertext = match Ciphertext::parse(binary) {
                None => return Ok(binary.to_value()),
                Some(ciphertext) => ciphertext?,
            };
            let key = KeyRef::Id(ciphertext.key_id);
            let (_, data_key) = keys
                .material(&key)
                .ok_or_else(|| Error::from(SourceError::KeyNotFound(key.to_string())))?;
            ciphertext.decrypt(hooks, data_key)
        })?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::Binary;
    use crate::core::key_vault::KeyId;

    fn ciphertext_value(key: u8) -> Value {
        let mut bytes = vec![2u8];
        bytes.extend_from_slice(&[key; 16]);
        bytes.push(1);
        bytes.extend_from_slice(&[0u8; 12 + 20]);
        Binary::new(ENCRYPTED_SUBTYPE, bytes).to_value()
    }

    #[test]
    fn test_plain_document_is_nothing_to_do() {
        let mut keys = KeyBroker::default();
        let (_, state) = DecryptOp::init(br#"{"a": 1}"#, &mut keys, false).unwrap();
        assert_eq!(state, State::NothingToDo);
        assert!(keys.is_empty());
    }

    #[test]
    fn test_ciphertexts_request_keys() {
        let input = json!({"a": ciphertext_value(1), "b": [ciphertext_value(2), ciphertext_value(1)]});
        let bytes = serde_json::to_vec(&input).unwrap();
        let mut keys = KeyBroker::default();
        let (op, state) = DecryptOp::init(&bytes, &mut keys, false).unwrap();
        assert_eq!(state, State::NeedMongoCollinfo);
        assert_eq!(op.operation(state).unwrap()["options.validator.$jsonSchema"]["$exists"], true);

        let filter = keys.filter();
        let ids = filter["$or"][0]["_id"]["$in"].as_array().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], KeyId::new([1; 16]).to_value());
    }

    #[test]
    fn test_schema_map_skips_collinfo() {
        let input = json!({"a": ciphertext_value(1)});
        let bytes = serde_json::to_vec(&input).unwrap();
        let mut keys = KeyBroker::default();
        let (_, state) = DecryptOp::init(&bytes, &mut keys, true).unwrap();
        assert_eq!(state, State::NeedMongoKeys);
    }

    #[test]
    fn test_malformed_input() {
        let mut keys = KeyBroker::default();
        assert!(DecryptOp::init(&[0x01, 0x02, 0x03], &mut keys, false).is_err());
        let truncated = json!({"a": Binary::new(ENCRYPTED_SUBTYPE, vec![1, 2]).to_value()});
        let bytes = serde_json::to_vec(&truncated).unwrap();
        assert!(DecryptOp::init(&bytes, &mut keys, false).is_err());
    }

    #[test]
    fn test_collinfo_shape_checked() {
        let mut keys = KeyBroker::default();
        let input = serde_json::to_vec(&json!({"a": ciphertext_value(1)})).unwrap();
        let (mut op, state) = DecryptOp::init(&input, &mut keys, false).unwrap();
        let good = json!({"name": "coll", "options": {}});
        op.feed(state, good.as_object().unwrap().clone()).unwrap();
        let bad = json!({"options": {}});
        assert!(op.feed(state, bad.as_object().unwrap().clone()).is_err());
        assert_eq!(op.mark_done(state).unwrap(), State::NeedMongoKeys);
    }
}
