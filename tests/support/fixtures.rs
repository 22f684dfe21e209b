//! Test fixtures and constants.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{json, Value};

use fieldcrypt::core::key_vault::{wrap_local_key, KeyId};
use fieldcrypt::{Buffer, CredentialEntry, CryptoHooks, KmsProvider};

/// Local master key used by every local-provider fixture.
pub const LOCAL_MASTER_KEY: [u8; 32] = [0x11; 32];

/// A 32-byte data key.
pub const DATA_KEY: [u8; 32] = [0x42; 32];

/// `"457-55-5462"` sealed deterministically under key id 1 and [`DATA_KEY`]
/// by the stub hooks: `[01][01 x16][01][iv 12][ciphertext 13][tag 16]`.
pub const SEALED_SSN: &str =
    "AQEBAQEBAQEBAQEBAQEBAQEBm0ZvFVqQ+cNc38L4xkyGS5SS/1DGvtzJG3Y1F10ZzIi73vQ27UMpU3I=";

/// Wrapped key material as some remote KMS would store it.
pub const WRAPPED_MATERIAL: &[u8] = b"opaque wrapped key material from a kms";

pub fn binary(subtype: u8, bytes: &[u8]) -> Value {
    json!({
        "$binary": {
            "base64": STANDARD.encode(bytes),
            "subType": format!("{:02x}", subtype),
        }
    })
}

pub fn key_id(id: u8) -> KeyId {
    KeyId::new([id; 16])
}

pub fn to_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("fixture serializes")
}

pub fn entry(provider: KmsProvider, payload: Value) -> CredentialEntry {
    CredentialEntry::new(provider, &Buffer::wrap(&to_bytes(&payload)))
}

pub fn local_credentials() -> CredentialEntry {
    entry(KmsProvider::Local, json!({"key": STANDARD.encode(LOCAL_MASTER_KEY)}))
}

pub fn aws_credentials() -> CredentialEntry {
    entry(
        KmsProvider::Aws,
        json!({"accessKeyId": "AKIDEXAMPLE", "secretAccessKey": "wJalrXUtnFEMI/K7MDENG"}),
    )
}

pub fn azure_credentials() -> CredentialEntry {
    entry(
        KmsProvider::Azure,
        json!({"tenantId": "tenant-1", "clientId": "client-1", "clientSecret": "azure-secret"}),
    )
}

pub fn gcp_credentials() -> CredentialEntry {
    entry(
        KmsProvider::Gcp,
        json!({"email": "svc@project.iam.gserviceaccount.com", "privateKey": STANDARD.encode(b"not a real pkcs8 key")}),
    )
}

/// Schema with one deterministically encrypted field.
pub fn encrypting_schema() -> Value {
    json!({
        "bsonType": "object",
        "properties": {
            "ssn": {"encrypt": {"bsonType": "string", "algorithm": "AEAD_AES_256_CBC_HMAC_SHA_512-Deterministic"}}
        }
    })
}

pub fn collinfo(name: &str, schema: Value) -> Vec<u8> {
    to_bytes(&json!({
        "name": name,
        "type": "collection",
        "options": {"validator": {"$jsonSchema": schema}},
    }))
}

pub fn markings_reply(result: Value) -> Vec<u8> {
    to_bytes(&json!({
        "hasEncryptionPlaceholders": true,
        "schemaRequiresEncryption": true,
        "result": result,
        "ok": 1,
    }))
}

pub fn key_document(id: u8, alt_name: Option<&str>, master_key: Value, material: &[u8]) -> Vec<u8> {
    let mut doc = json!({
        "_id": key_id(id).to_value(),
        "keyMaterial": binary(0, material),
        "creationDate": {"$date": "2026-01-01T00:00:00Z"},
        "status": 0,
        "masterKey": master_key,
    });
    if let Some(name) = alt_name {
        doc["keyAltNames"] = json!([name]);
    }
    to_bytes(&doc)
}

/// Key document whose material is `data_key` sealed under [`LOCAL_MASTER_KEY`].
pub fn local_key_document(hooks: &dyn CryptoHooks, id: u8, data_key: &[u8]) -> Vec<u8> {
    let material = wrap_local_key(hooks, &LOCAL_MASTER_KEY, data_key).expect("wrap failed");
    key_document(id, None, json!({"provider": "local"}), &material)
}

pub fn aws_key_document(id: u8) -> Vec<u8> {
    key_document(
        id,
        None,
        json!({"provider": "aws", "region": "us-east-1", "key": "arn:aws:kms:us-east-1:579766882180:key/89fcc2c4"}),
        WRAPPED_MATERIAL,
    )
}

pub fn azure_key_document(id: u8) -> Vec<u8> {
    key_document(
        id,
        None,
        json!({"provider": "azure", "keyVaultEndpoint": "example.vault.azure.net", "keyName": "key-name"}),
        WRAPPED_MATERIAL,
    )
}

pub fn gcp_key_document(id: u8) -> Vec<u8> {
    key_document(
        id,
        None,
        json!({"provider": "gcp", "projectId": "proj", "location": "global", "keyRing": "ring", "keyName": "key"}),
        WRAPPED_MATERIAL,
    )
}

/// A complete HTTP/1.1 reply with a JSON body.
pub fn http_reply(status: u16, body: &Value) -> Vec<u8> {
    let body = to_bytes(body);
    let mut reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        status,
        if status == 200 { "OK" } else { "Error" },
        body.len()
    )
    .into_bytes();
    reply.extend_from_slice(&body);
    reply
}

pub fn aws_decrypt_reply(data_key: &[u8]) -> Vec<u8> {
    http_reply(200, &json!({"KeyId": "arn:aws:kms:us-east-1:579766882180:key/89fcc2c4", "Plaintext": STANDARD.encode(data_key)}))
}

pub fn oauth_reply(token: &str) -> Vec<u8> {
    http_reply(200, &json!({"access_token": token, "token_type": "Bearer", "expires_in": 3599}))
}

pub fn azure_unwrap_reply(data_key: &[u8]) -> Vec<u8> {
    http_reply(200, &json!({"kid": "https://example.vault.azure.net/keys/key-name/1", "value": URL_SAFE_NO_PAD.encode(data_key)}))
}

pub fn gcp_decrypt_reply(data_key: &[u8]) -> Vec<u8> {
    http_reply(200, &json!({"plaintext": STANDARD.encode(data_key)}))
}

/// The command a client would send, with its encrypted field marked.
pub fn find_command(marking: Value) -> Value {
    json!({"find": "test", "filter": {"ssn": marking, "name": "Jane"}})
}

/// A stored document whose `ssn` field is [`SEALED_SSN`].
pub fn sealed_find_command() -> Vec<u8> {
    format!(
        r#"{{"find":"test","filter":{{"ssn":{{"$binary":{{"base64":"{}","subType":"06"}}}},"name":"Jane"}}}}"#,
        SEALED_SSN
    )
    .into_bytes()
}
