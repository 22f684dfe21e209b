//! KMS requests.
//!
//! A `KmsRequest` is one HTTPS exchange the caller performs on the engine's
//! behalf: it exposes the exact request bytes and the endpoint to send them
//! to, then accepts the response in arbitrary chunks. Once the response is
//! complete it is parsed into a token or an unwrapped data key.
//!
//! ## Providers
//!
//! - **aws**: one `TrentService.Decrypt` call per key, signed with SigV4.
//! - **azure**: an OAuth token request, then one `unwrapkey` call per key.
//! - **gcp**: an OAuth token request with a signed JWT, then one `decrypt`
//!   call per key.

mod aws;
mod azure;
mod gcp;
mod http;

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::core::buffer::Buffer;
use crate::core::constants::KMS_PORT;
use crate::core::credentials::{CredentialStore, KmsProvider};
use crate::core::hooks::CryptoHooks;
use crate::core::key_vault::{KeyDocument, KeyId, MasterKey};
use crate::core::status::Status;
use crate::error::{ClientError, Error, KmsError, Result};

use self::http::ResponseParser;

/// What a request asks the KMS for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KmsRequestKind {
    AwsDecrypt,
    AzureOauth,
    AzureUnwrap,
    GcpOauth,
    GcpDecrypt,
}

impl KmsRequestKind {
    pub fn provider(&self) -> KmsProvider {
        match self {
            Self::AwsDecrypt => KmsProvider::Aws,
            Self::AzureOauth | Self::AzureUnwrap => KmsProvider::Azure,
            Self::GcpOauth | Self::GcpDecrypt => KmsProvider::Gcp,
        }
    }

    /// Short operation name: `oauth`, `decrypt` or `unwrap`.
    pub fn op(&self) -> &'static str {
        match self {
            Self::AzureOauth | Self::GcpOauth => "oauth",
            Self::AzureUnwrap => "unwrap",
            Self::AwsDecrypt | Self::GcpDecrypt => "decrypt",
        }
    }
}

impl fmt::Display for KmsRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.provider(), self.op())
    }
}

/// Parsed result of a completed request.
pub(crate) enum KmsOutcome {
    Token(KmsProvider, Zeroizing<String>),
    DataKey(KeyId, Zeroizing<Vec<u8>>),
}

/// One outstanding KMS exchange.
pub struct KmsRequest {
    kind: KmsRequestKind,
    key_id: Option<KeyId>,
    endpoint: String,
    message: Vec<u8>,
    parser: ResponseParser,
    status: Status,
    failed: bool,
    outcome: Option<KmsOutcome>,
}

impl KmsRequest {
    fn new(kind: KmsRequestKind, key_id: Option<KeyId>, endpoint: String, message: Vec<u8>) -> Self {
        debug!(kind = %kind, endpoint = %endpoint, len = message.len(), "kms request created");
        Self {
            kind,
            key_id,
            endpoint,
            message,
            parser: ResponseParser::new(),
            status: Status::ok(),
            failed: false,
            outcome: None,
        }
    }

    /// The exact bytes to send.
    pub fn message(&self) -> Buffer<'_> {
        Buffer::wrap(&self.message)
    }

    /// `host:port` to open a TLS connection to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn provider(&self) -> KmsProvider {
        self.kind.provider()
    }

    pub fn kind(&self) -> KmsRequestKind {
        self.kind
    }

    /// Data key this request unwraps, if any.
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    /// Reply bytes still required. Zero once satisfied or failed.
    pub fn bytes_needed(&self) -> usize {
        if self.failed {
            0
        } else {
            self.parser.bytes_needed()
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn was_fed(&self) -> bool {
        self.failed || self.parser.received() > 0
    }

    /// Append a chunk of the reply.
    pub fn feed(&mut self, chunk: &Buffer<'_>) -> Result<()> {
        if self.bytes_needed() == 0 {
            let err: Error = ClientError::KmsSatisfied.into();
            self.status.set(&err);
            return Err(err);
        }
        trace!(kind = %self.kind, len = chunk.len(), "feeding kms reply");
        match self.consume(chunk.data()) {
            Ok(()) => {
                self.status.clear();
                Ok(())
            }
            Err(err) => {
                debug!(kind = %self.kind, error = %err, "kms request failed");
                self.failed = true;
                self.status.set(&err);
                Err(err)
            }
        }
    }

    fn consume(&mut self, chunk: &[u8]) -> Result<()> {
        self.parser.feed(chunk)?;
        if !self.parser.is_complete() {
            return Ok(());
        }
        let status = self.parser.status().unwrap_or_default();
        let body = self.parser.body();
        if status != 200 {
            return Err(KmsError::Http {
                status,
                body: String::from_utf8_lossy(body).into_owned(),
            }
            .into());
        }
        let reply: Value = serde_json::from_slice(body)
            .map_err(|e| KmsError::MalformedResponse(format!("body is not JSON: {}", e)))?;
        self.outcome = Some(self.parse_reply(&reply)?);
        debug!(kind = %self.kind, "kms reply complete");
        Ok(())
    }

    fn parse_reply(&self, reply: &Value) -> Result<KmsOutcome> {
        let key_id = || {
            self.key_id
                .ok_or_else(|| Error::from(KmsError::Failed("request has no key id".into())))
        };
        Ok(match self.kind {
            KmsRequestKind::AzureOauth | KmsRequestKind::GcpOauth => {
                KmsOutcome::Token(self.provider(), token_field(reply)?)
            }
            KmsRequestKind::AwsDecrypt => KmsOutcome::DataKey(key_id()?, aws::parse_reply(reply)?),
            KmsRequestKind::AzureUnwrap => {
                KmsOutcome::DataKey(key_id()?, azure::parse_reply(reply)?)
            }
            KmsRequestKind::GcpDecrypt => KmsOutcome::DataKey(key_id()?, gcp::parse_reply(reply)?),
        })
    }

    pub(crate) fn take_outcome(&mut self) -> Option<KmsOutcome> {
        self.outcome.take()
    }
}

impl fmt::Debug for KmsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsRequest")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("bytes_needed", &self.bytes_needed())
            .field("status", &self.status)
            .finish()
    }
}

/// OAuth tokens obtained by one context.
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: HashMap<KmsProvider, Zeroizing<String>>,
}

impl TokenCache {
    pub fn insert(&mut self, provider: KmsProvider, token: Zeroizing<String>) {
        self.tokens.insert(provider, token);
    }

    fn get(&self, provider: KmsProvider) -> Option<&str> {
        self.tokens.get(&provider).map(|t| t.as_str())
    }
}

/// Build the next round of requests for keys whose material is still wrapped.
///
/// Providers needing a bearer token get a single token request per round
/// until a token is cached; their key requests follow in the next round.
pub(crate) fn plan_requests<'a>(
    hooks: &dyn CryptoHooks,
    credentials: &CredentialStore,
    pending: impl Iterator<Item = &'a KeyDocument>,
    tokens: &TokenCache,
    now: DateTime<Utc>,
) -> Result<Vec<KmsRequest>> {
    let mut requests = Vec::new();
    let mut token_requested = Vec::new();

    for doc in pending {
        let provider = doc.master_key().provider();
        if provider == KmsProvider::Local {
            continue;
        }
        let creds = credentials.require(provider)?;

        let needs_token = matches!(provider, KmsProvider::Azure | KmsProvider::Gcp);
        if needs_token && tokens.get(provider).is_none() {
            if !token_requested.contains(&provider) {
                token_requested.push(provider);
                requests.push(match provider {
                    KmsProvider::Azure => azure::oauth_request(&creds.azure()?)?,
                    _ => gcp::oauth_request(hooks, &creds.gcp()?, now)?,
                });
            }
            continue;
        }

        let token = tokens.get(provider).unwrap_or_default();
        requests.push(match doc.master_key() {
            MasterKey::Aws {
                region,
                key,
                endpoint,
            } => aws::decrypt_request(
                hooks,
                &creds.aws()?,
                aws::Target {
                    region,
                    key,
                    endpoint: endpoint.as_deref(),
                },
                doc,
                now,
            )?,
            MasterKey::Azure {
                key_vault_endpoint,
                key_name,
                key_version,
            } => azure::unwrap_request(
                token,
                azure::Target {
                    key_vault_endpoint,
                    key_name,
                    key_version: key_version.as_deref(),
                },
                doc,
            )?,
            MasterKey::Gcp {
                project_id,
                location,
                key_ring,
                key_name,
                endpoint,
                ..
            } => gcp::decrypt_request(
                token,
                gcp::Target {
                    project_id,
                    location,
                    key_ring,
                    key_name,
                    endpoint: endpoint.as_deref(),
                },
                doc,
            )?,
            MasterKey::Local => continue,
        });
    }
    Ok(requests)
}

/// Split a configured endpoint into the `Host` header value and the
/// `host:port` to connect to.
fn resolve_endpoint(raw: &str) -> (String, String) {
    let host = raw
        .trim_start_matches("https://")
        .trim_end_matches('/')
        .to_string();
    let connect = if host.contains(':') {
        host.clone()
    } else {
        format!("{}:{}", host, KMS_PORT)
    };
    (host, connect)
}

/// Serialize an HTTP/1.1 POST.
fn http_post(host: &str, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("POST {} HTTP/1.1\r\nHost: {}\r\n", path, host);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut message = head.into_bytes();
    message.extend_from_slice(body);
    message
}

/// `application/x-www-form-urlencoded` body.
fn form_encode(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

fn token_field(reply: &Value) -> Result<Zeroizing<String>> {
    reply
        .get("access_token")
        .and_then(Value::as_str)
        .map(|t| Zeroizing::new(t.to_string()))
        .ok_or_else(|| KmsError::MissingField("access_token").into())
}

fn base64_field(
    reply: &Value,
    field: &'static str,
    engine: &impl Engine,
) -> Result<Zeroizing<Vec<u8>>> {
    let encoded = reply
        .get(field)
        .and_then(Value::as_str)
        .ok_or(KmsError::MissingField(field))?;
    engine
        .decode(encoded)
        .map(Zeroizing::new)
        .map_err(|e| KmsError::MalformedResponse(format!("{} is not base64: {}", field, e)).into())
}
