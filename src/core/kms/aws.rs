//! AWS KMS `Decrypt`, signed with Signature Version 4.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::trace;
use zeroize::Zeroizing;

use super::{base64_field, http_post, resolve_endpoint, KmsRequest, KmsRequestKind};
use crate::core::credentials::AwsCredentials;
use crate::core::hooks::{hex, hook_failed, CryptoHooks};
use crate::core::key_vault::KeyDocument;
use crate::error::{ClientError, Result};

const SERVICE: &str = "kms";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const TARGET: &str = "TrentService.Decrypt";

/// Master key coordinates from the key document.
pub(super) struct Target<'a> {
    pub region: &'a str,
    pub key: &'a str,
    pub endpoint: Option<&'a str>,
}

pub(super) fn decrypt_request(
    hooks: &dyn CryptoHooks,
    creds: &AwsCredentials,
    target: Target<'_>,
    doc: &KeyDocument,
    now: DateTime<Utc>,
) -> Result<KmsRequest> {
    let default_host = format!("kms.{}.amazonaws.com", target.region);
    let (host, endpoint) = resolve_endpoint(target.endpoint.unwrap_or(&default_host));

    let body = serde_json::to_vec(&json!({
        "CiphertextBlob": base64::engine::general_purpose::STANDARD.encode(doc.key_material()),
    }))
    .map_err(|e| ClientError::InvalidDocument(e.to_string()))?;

    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, target.region, SERVICE);

    // Sorted by lowercase name.
    let mut signed: Vec<(&str, &str)> = vec![
        ("content-type", CONTENT_TYPE),
        ("host", host.as_str()),
        ("x-amz-date", amz_date.as_str()),
    ];
    if let Some(token) = creds.session_token.as_deref() {
        signed.push(("x-amz-security-token", token));
    }
    signed.push(("x-amz-target", TARGET));

    let signed_names = signed
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = signed
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let body_hash = hex(&hooks.sha256(&body).map_err(hook_failed("sha256"))?);
    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_names, body_hash
    );
    let request_hash = hex(
        &hooks
            .sha256(canonical_request.as_bytes())
            .map_err(hook_failed("sha256"))?,
    );
    let string_to_sign = format!("{}\n{}\n{}\n{}", ALGORITHM, amz_date, scope, request_hash);

    let signature = hex(&sign(
        hooks,
        &creds.secret_access_key,
        &[date.as_str(), target.region, SERVICE, "aws4_request"],
        string_to_sign.as_bytes(),
    )?);
    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, creds.access_key_id, scope, signed_names, signature
    );
    trace!(key = target.key, scope = %scope, "signed aws decrypt request");

    let mut headers: Vec<(&str, &str)> = vec![
        ("Authorization", authorization.as_str()),
        ("Content-Type", CONTENT_TYPE),
        ("X-Amz-Date", amz_date.as_str()),
        ("X-Amz-Target", TARGET),
    ];
    if let Some(token) = creds.session_token.as_deref() {
        headers.push(("X-Amz-Security-Token", token));
    }
    let message = http_post(&host, "/", &headers, &body);
    Ok(KmsRequest::new(
        KmsRequestKind::AwsDecrypt,
        Some(doc.id()),
        endpoint,
        message,
    ))
}

/// Derive the signing key through the scope parts and sign `input`.
fn sign(hooks: &dyn CryptoHooks, secret: &str, scope: &[&str], input: &[u8]) -> Result<Vec<u8>> {
    let mut key = Zeroizing::new(format!("AWS4{}", secret).into_bytes());
    for part in scope {
        key = Zeroizing::new(
            hooks
                .hmac_sha256(&key, part.as_bytes())
                .map_err(hook_failed("hmac_sha256"))?,
        );
    }
    hooks
        .hmac_sha256(&key, input)
        .map_err(hook_failed("hmac_sha256"))
}

pub(super) fn parse_reply(reply: &Value) -> Result<Zeroizing<Vec<u8>>> {
    base64_field(reply, "Plaintext", &base64::engine::general_purpose::STANDARD)
}
