//! Structured documents.
//!
//! Documents travel as UTF-8 JSON objects. Binary values use the MongoDB
//! Extended JSON shape `{"$binary": {"base64": "..", "subType": "hh"}}`; the
//! legacy `{"$binary": "..", "$type": "hh"}` form is accepted on input.

use base64::Engine;
use serde_json::{json, Map, Value};

use crate::error::{ClientError, Error, Result};

pub(crate) type Document = Map<String, Value>;

/// Parse bytes as a JSON object.
pub(crate) fn parse(bytes: &[u8]) -> std::result::Result<Document, String> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(doc)) => Ok(doc),
        Ok(other) => Err(format!("expected a document, got {}", type_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

/// Serialize a document compactly.
pub(crate) fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ClientError::InvalidDocument(e.to_string()).into())
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "document",
    }
}

/// Look up a dotted path such as `options.validator.$jsonSchema`.
pub(crate) fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// A binary value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Binary {
    pub subtype: u8,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: u8, bytes: Vec<u8>) -> Self {
        Self { subtype, bytes }
    }

    /// `None` when `value` is not a binary at all, `Some(Err)` when it looks
    /// like one but is malformed.
    pub fn from_value(value: &Value) -> Option<std::result::Result<Self, String>> {
        let obj = value.as_object()?;
        let inner = obj.get("$binary")?;
        Some(Self::parse_fields(obj, inner))
    }

    fn parse_fields(obj: &Document, inner: &Value) -> std::result::Result<Self, String> {
        let (encoded, subtype) = match inner {
            Value::Object(fields) => (fields.get("base64"), fields.get("subType")),
            Value::String(_) => (Some(inner), obj.get("$type")),
            _ => return Err("$binary must be a document or string".to_string()),
        };
        let encoded = encoded
            .and_then(Value::as_str)
            .ok_or("$binary is missing base64 data")?;
        let subtype = subtype
            .and_then(Value::as_str)
            .ok_or("$binary is missing its subtype")?;
        let subtype = u8::from_str_radix(subtype, 16)
            .map_err(|_| format!("invalid binary subtype {:?}", subtype))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| format!("invalid base64 in $binary: {}", e))?;
        Ok(Self { subtype, bytes })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "$binary": {
                "base64": base64::engine::general_purpose::STANDARD.encode(&self.bytes),
                "subType": format!("{:02x}", self.subtype),
            }
        })
    }
}

/// Every binary of `subtype` reachable from `value`, in document order.
pub(crate) fn collect_binaries(
    value: &Value,
    subtype: u8,
) -> std::result::Result<Vec<Binary>, String> {
    let mut found = Vec::new();
    collect_into(value, subtype, &mut found)?;
    Ok(found)
}

fn collect_into(
    value: &Value,
    subtype: u8,
    found: &mut Vec<Binary>,
) -> std::result::Result<(), String> {
    if let Some(binary) = Binary::from_value(value) {
        let binary = binary?;
        if binary.subtype == subtype {
            found.push(binary);
        }
        return Ok(());
    }
    match value {
        Value::Object(map) => map
            .values()
            .try_for_each(|v| collect_into(v, subtype, found)),
        Value::Array(items) => items
            .iter()
            .try_for_each(|v| collect_into(v, subtype, found)),
        _ => Ok(()),
    }
}

/// Replace every binary of `subtype` with the value `f` returns for it.
pub(crate) fn replace_binaries<F>(value: &mut Value, subtype: u8, f: &mut F) -> Result<()>
where
    F: FnMut(&Binary) -> Result<Value>,
{
    if let Some(binary) = Binary::from_value(value) {
        let binary = binary.map_err(|e| Error::from(ClientError::InvalidDocument(e)))?;
        if binary.subtype == subtype {
            *value = f(&binary)?;
        }
        return Ok(());
    }
    match value {
        Value::Object(map) => map
            .values_mut()
            .try_for_each(|v| replace_binaries(v, subtype, f)),
        Value::Array(items) => items
            .iter_mut()
            .try_for_each(|v| replace_binaries(v, subtype, f)),
        _ => Ok(()),
    }
}
