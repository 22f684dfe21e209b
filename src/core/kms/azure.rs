//! Azure Key Vault: client-credentials token, then `unwrapkey`.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde_json::{json, Value};
use zeroize::Zeroizing;

use super::{
    base64_field, form_encode, http_post, resolve_endpoint, KmsRequest, KmsRequestKind,
};
use crate::core::constants::AZURE_IDENTITY_HOST;
use crate::core::credentials::AzureCredentials;
use crate::core::key_vault::KeyDocument;
use crate::error::{ClientError, Result};

const SCOPE: &str = "https://vault.azure.net/.default";
const API_VERSION: &str = "7.1";
const WRAP_ALGORITHM: &str = "RSA-OAEP-256";

/// Key Vault replies are base64url, with or without padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(super) struct Target<'a> {
    pub key_vault_endpoint: &'a str,
    pub key_name: &'a str,
    pub key_version: Option<&'a str>,
}

pub(super) fn oauth_request(creds: &AzureCredentials) -> Result<KmsRequest> {
    let (host, endpoint) = resolve_endpoint(
        creds
            .identity_platform_endpoint
            .as_deref()
            .unwrap_or(AZURE_IDENTITY_HOST),
    );
    let path = format!("/{}/oauth2/v2.0/token", creds.tenant_id);
    let body = Zeroizing::new(form_encode(&[
        ("client_id", creds.client_id.as_str()),
        ("scope", SCOPE),
        ("client_secret", creds.client_secret.as_str()),
        ("grant_type", "client_credentials"),
    ]));
    let message = http_post(
        &host,
        &path,
        &[("Content-Type", "application/x-www-form-urlencoded")],
        body.as_bytes(),
    );
    Ok(KmsRequest::new(
        KmsRequestKind::AzureOauth,
        None,
        endpoint,
        message,
    ))
}

pub(super) fn unwrap_request(
    token: &str,
    target: Target<'_>,
    doc: &KeyDocument,
) -> Result<KmsRequest> {
    let (host, endpoint) = resolve_endpoint(target.key_vault_endpoint);
    let path = match target.key_version {
        Some(version) => format!(
            "/keys/{}/{}/unwrapkey?api-version={}",
            target.key_name, version, API_VERSION
        ),
        None => format!("/keys/{}/unwrapkey?api-version={}", target.key_name, API_VERSION),
    };
    let body = serde_json::to_vec(&json!({
        "alg": WRAP_ALGORITHM,
        "value": URL_SAFE_LENIENT.encode(doc.key_material()),
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
        KmsRequestKind::AzureUnwrap,
        Some(doc.id()),
        endpoint,
        message,
    ))
}

pub(super) fn parse_reply(reply: &Value) -> Result<Zeroizing<Vec<u8>>> {
    base64_field(reply, "value", &URL_SAFE_LENIENT)
}
