//! Google Cloud KMS: JWT-bearer token, then `cryptoKeys.decrypt`.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::trace;
use zeroize::Zeroizing;

use super::{
    base64_field, form_encode, http_post, resolve_endpoint, KmsRequest, KmsRequestKind,
};
use crate::core::constants::{GCP_JWT_LIFETIME_SECS, GCP_KMS_HOST, GCP_OAUTH_HOST};
use crate::core::credentials::GcpCredentials;
use crate::core::hooks::{hook_failed, CryptoHooks};
use crate::core::key_vault::KeyDocument;
use crate::error::{ClientError, Result};

const SCOPE: &str = "https://www.googleapis.com/auth/cloudkms";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

pub(super) struct Target<'a> {
    pub project_id: &'a str,
    pub location: &'a str,
    pub key_ring: &'a str,
    pub key_name: &'a str,
    pub endpoint: Option<&'a str>,
}

fn b64url(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Signed RS256 assertion for the service account.
fn assertion(
    hooks: &dyn CryptoHooks,
    creds: &GcpCredentials,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String> {
    let header = json!({"alg": "RS256", "typ": "JWT"});
    let claims = json!({
        "iss": creds.email,
        "aud": audience,
        "scope": SCOPE,
        "iat": now.timestamp(),
        "exp": (now + Duration::seconds(GCP_JWT_LIFETIME_SECS)).timestamp(),
    });
    let encode = |value: &Value| {
        serde_json::to_vec(value)
            .map(|bytes| b64url(&bytes))
            .map_err(|e| ClientError::InvalidDocument(e.to_string()))
    };
    let signing_input = format!("{}.{}", encode(&header)?, encode(&claims)?);
    let signature = hooks
        .sign_rsaes_pkcs1_v1_5(&creds.private_key_der(), signing_input.as_bytes())
        .map_err(hook_failed("sign_rsaes_pkcs1_v1_5"))?;
    trace!(iss = %creds.email, "signed gcp jwt assertion");
    Ok(format!("{}.{}", signing_input, b64url(&signature)))
}

pub(super) fn oauth_request(
    hooks: &dyn CryptoHooks,
    creds: &GcpCredentials,
    now: DateTime<Utc>,
) -> Result<KmsRequest> {
    let (host, endpoint) = resolve_endpoint(creds.endpoint.as_deref().unwrap_or(GCP_OAUTH_HOST));
    let audience = format!("https://{}/token", host);
    let assertion = Zeroizing::new(assertion(hooks, creds, &audience, now)?);
    let body = form_encode(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())]);
    let message = http_post(
        &host,
        "/token",
        &[("Content-Type", "application/x-www-form-urlencoded")],
        body.as_bytes(),
    );
    Ok(KmsRequest::new(
        KmsRequestKind::GcpOauth,
        None,
        endpoint,
        message,
    ))
}

pub(super) fn decrypt_request(
    token: &str,
    target: Target<'_>,
    doc: &KeyDocument,
) -> Result<KmsRequest> {
    let (host, endpoint) = resolve_endpoint(target.endpoint.unwrap_or(GCP_KMS_HOST));
    let path = format!(
        "/v1/projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}:decrypt",
        target.project_id, target.location, target.key_ring, target.key_name
    );
    let body = serde_json::to_vec(&json!({
        "ciphertext": base64::engine::general_purpose::STANDARD.encode(doc.key_material()),
    }))
    .map_err(|e| ClientError::InvalidDocument(e.to_string()))?;
    let authorization = Zeroizing::new(format!("Bearer {}", token));
    let message = http_post(
        &host,
        &path,
        &[
            ("Authorization", authorization.as_str()),
            ("Content-Type", "application/json"),
        ],
        &body,
    );
    Ok(KmsRequest::new(
        KmsRequestKind::GcpDecrypt,
        Some(doc.id()),
        endpoint,
        message,
    ))
}

pub(super) fn parse_reply(reply: &Value) -> Result<Zeroizing<Vec<u8>>> {
    base64_field(reply, "plaintext", &base64::engine::general_purpose::STANDARD)
}
