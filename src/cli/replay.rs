//! Replay a context against recorded replies.
//!
//! Fixture directory layout:
//!
//! ```text
//! collection-info.json       # optional; one document, or an array of them
//! markings.json              # query-analysis reply (encryption only)
//! key-document*.json         # key-vault documents, fed in name order
//! kms-<provider>-<op>.http   # raw HTTP reply for one request kind
//! kms.http                   # fallback for any KMS request
//! ```
//!
//! Only headers are line-ending normalized in `.http` fixtures, so the
//! body must match its `Content-Length`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::output;
use super::ReplayOperation;
use crate::core::buffer::Buffer;
use crate::core::client::CryptClient;
use crate::core::config::Config;
use crate::core::context::{Context, State};
use crate::core::hooks::RingHooks;
use crate::core::kms::{KmsRequest, KmsRequestKind};
use crate::error::{ConfigError, Error, Result};

pub struct ReplayArgs {
    pub config: PathBuf,
    pub fixtures: PathBuf,
    pub chunk_size: usize,
    pub pretty: bool,
    pub operation: ReplayOperation,
}

/// Run one context to a terminal state.
///
/// Progress goes to stderr; the resulting document goes to stdout.
pub fn execute(args: &ReplayArgs) -> Result<()> {
    let config = Config::load(&args.config)?;
    let client = CryptClient::create(Arc::new(RingHooks::new()), config.client_options()?)?;
    let fixtures = Fixtures::new(&args.fixtures);

    let mut ctx = match &args.operation {
        ReplayOperation::Encrypt { ns } => client.encrypt_context(ns),
        ReplayOperation::Decrypt { input } => {
            let bytes = fs::read(input).map_err(|e| ConfigError::InvalidValue {
                field: "input".to_string(),
                reason: format!("{}: {}", input.display(), e),
            })?;
            client.decrypt_context(&Buffer::wrap(&bytes))
        }
    };
    info!(kind = ?ctx.kind(), "replaying context");

    loop {
        let state = ctx.state();
        output::state(state.name());
        match state {
            State::NeedMongoCollinfo => {
                announce(&mut ctx)?;
                for reply in fixtures.collection_info()? {
                    ctx.feed(&Buffer::wrap(&reply))?;
                }
                ctx.mark_done()?;
            }
            State::NeedMongoMarkings => {
                announce(&mut ctx)?;
                let reply = fixtures.read("markings.json")?;
                ctx.feed(&Buffer::wrap(&reply))?;
                ctx.mark_done()?;
            }
            State::NeedMongoKeys => {
                announce(&mut ctx)?;
                for reply in fixtures.key_documents()? {
                    ctx.feed(&Buffer::wrap(&reply))?;
                }
                ctx.mark_done()?;
            }
            State::NeedKms => {
                for request in ctx.kms_requests()? {
                    output::kv(&request.kind().to_string(), request.endpoint());
                    let reply = fixtures.kms_reply(request.kind())?;
                    feed_in_chunks(request, &reply, args.chunk_size)?;
                }
                ctx.mark_kms_done()?;
            }
            State::Ready => {
                let document = ctx.finalize()?;
                print_document(document.data(), args.pretty)?;
            }
            State::Done => {
                output::success("done");
                return Ok(());
            }
            State::NothingToDo => {
                output::success("nothing to do");
                return Ok(());
            }
            State::Error => return Err(Error::Status(ctx.status().clone())),
        }
    }
}

/// Show the request document of the current phase.
fn announce(ctx: &mut Context) -> Result<()> {
    let operation = ctx.get_operation()?;
    output::kv("operation", String::from_utf8_lossy(operation.data()));
    Ok(())
}

fn feed_in_chunks(request: &mut KmsRequest, reply: &[u8], chunk_size: usize) -> Result<()> {
    let size = if chunk_size == 0 {
        reply.len().max(1)
    } else {
        chunk_size
    };
    for chunk in reply.chunks(size) {
        debug!(len = chunk.len(), needed = request.bytes_needed(), "feeding kms reply");
        request.feed(&Buffer::wrap(chunk))?;
    }
    Ok(())
}

fn print_document(bytes: &[u8], pretty: bool) -> Result<()> {
    if pretty {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| ConfigError::InvalidValue {
            field: "output".to_string(),
            reason: e.to_string(),
        })?;
        let text = serde_json::to_string_pretty(&value).map_err(|e| ConfigError::InvalidValue {
            field: "output".to_string(),
            reason: e.to_string(),
        })?;
        println!("{}", text);
    } else {
        println!("{}", String::from_utf8_lossy(bytes));
    }
    Ok(())
}

/// A directory of recorded replies.
struct Fixtures {
    dir: PathBuf,
}

impl Fixtures {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Err(ConfigError::MissingFixture(path.display().to_string()).into());
        }
        debug!(path = %path.display(), "reading fixture");
        Ok(fs::read(&path)?)
    }

    /// Collection infos to feed; none if the fixture is absent.
    fn collection_info(&self) -> Result<Vec<Vec<u8>>> {
        let name = "collection-info.json";
        if !self.dir.join(name).exists() {
            return Ok(Vec::new());
        }
        let bytes = self.read(name)?;
        split_array(bytes)
    }

    fn key_documents(&self) -> Result<Vec<Vec<u8>>> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("key-document") && name.ends_with(".json"))
            .collect();
        names.sort();
        names.iter().map(|name| self.read(name)).collect()
    }

    fn kms_reply(&self, kind: KmsRequestKind) -> Result<Vec<u8>> {
        let specific = format!("kms-{}.http", kind);
        let name = if self.dir.join(&specific).exists() {
            specific
        } else {
            "kms.http".to_string()
        };
        Ok(normalize_http(&self.read(&name)?))
    }
}

/// A JSON array fixture becomes one reply per element; anything else is
/// fed verbatim.
fn split_array(bytes: Vec<u8>) -> Result<Vec<Vec<u8>>> {
    if bytes.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'[') {
        return Ok(vec![bytes]);
    }
    let items: Vec<Value> = serde_json::from_slice(&bytes).map_err(|e| ConfigError::InvalidValue {
        field: "collection-info.json".to_string(),
        reason: e.to_string(),
    })?;
    items
        .iter()
        .map(|item| {
            serde_json::to_vec(item).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "collection-info.json".to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}

/// CRLF-terminate header lines and drop trailing whitespace after the body.
fn normalize_http(raw: &[u8]) -> Vec<u8> {
    let text = String::from_utf8_lossy(raw).replace("\r\n", "\n");
    let (head, body) = text.split_once("\n\n").unwrap_or((text.as_str(), ""));
    let mut out = head.replace('\n', "\r\n");
    out.push_str("\r\n\r\n");
    out.push_str(body.trim_end());
    out.into_bytes()
}
