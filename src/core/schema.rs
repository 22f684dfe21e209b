//! Namespaces, schema maps and collection-info schemas.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::core::buffer::Buffer;
use crate::core::document::{self, Document};
use crate::error::{ClientError, Result, SourceError};

const SCHEMA_PATH: &str = "options.validator.$jsonSchema";

/// A `<db>.<collection>` namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    db: String,
    coll: String,
}

impl Namespace {
    pub fn parse(ns: &str) -> Result<Self> {
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self {
                db: db.to_string(),
                coll: coll.to_string(),
            }),
            _ => Err(ClientError::InvalidNamespace(ns.to_string()).into()),
        }
    }

    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn coll(&self) -> &str {
        &self.coll
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// Locally configured schemas, keyed by namespace.
#[derive(Debug, Clone, Default)]
pub(crate) struct SchemaMap {
    schemas: HashMap<String, Value>,
}

impl SchemaMap {
    /// Parse `{"<db>.<coll>": <schema document>, ...}`.
    pub fn parse(buffer: &Buffer<'_>) -> Result<Self> {
        let doc = document::parse(buffer.data())
            .map_err(|e| ClientError::InvalidDocument(format!("schema map: {}", e)))?;
        let mut schemas = HashMap::with_capacity(doc.len());
        for (ns, schema) in doc {
            Namespace::parse(&ns)?;
            if !schema.is_object() {
                return Err(ClientError::InvalidDocument(format!(
                    "schema map entry {} must be a document, got {}",
                    ns,
                    document::type_name(&schema)
                ))
                .into());
            }
            schemas.insert(ns, schema);
        }
        Ok(Self { schemas })
    }

    pub fn get(&self, ns: &Namespace) -> Option<&Value> {
        self.schemas.get(&ns.to_string())
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }
}

/// The JSON schema carried by a collection info document, if any.
pub(crate) fn collinfo_schema(info: &Document) -> std::result::Result<Option<Value>, SourceError> {
    if !info.contains_key("name") {
        return Err(SourceError::MalformedReply {
            phase: "collection info",
            reason: "missing \"name\"".to_string(),
        });
    }
    match document::get_path(info, SCHEMA_PATH) {
        None => Ok(None),
        Some(schema @ Value::Object(_)) => Ok(Some(schema.clone())),
        Some(other) => Err(SourceError::MalformedReply {
            phase: "collection info",
            reason: format!("$jsonSchema must be a document, got {}", document::type_name(other)),
        }),
    }
}

/// Whether any part of `schema` asks for encryption.
pub(crate) fn requires_encryption(schema: &Value) -> bool {
    match schema {
        Value::Object(map) => map
            .iter()
            .any(|(k, v)| k == "encrypt" || requires_encryption(v)),
        Value::Array(items) => items.iter().any(requires_encryption),
        _ => false,
    }
}
