//! IMAP source: read-only mailbox access over TLS.
//!
//! The folder is opened with `EXAMINE` and bodies are fetched with
//! `BODY.PEEK[]`, so neither flags nor read state change on the server.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::{MessageSource, NormalizedMessage};

const NAME: &str = "imap";

/// IMAP source configuration.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
}

/// Keys read by [`ImapConfig::from_lookup`].
pub const CONFIG_KEYS: &[&str] = &[
    "EMAIL_IMAP_HOST",
    "EMAIL_IMAP_PORT",
    "EMAIL_USERNAME",
    "EMAIL_PASSWORD",
    "EMAIL_IMAP_FOLDER",
];

impl ImapConfig {
    /// Build config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| ConfigError::MissingRequired {
                key: key.to_string(),
                hint: "Required when MAILBOX_BACKEND=imap".to_string(),
            })
        };

        let port = match get("EMAIL_IMAP_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "EMAIL_IMAP_PORT".to_string(),
                message: format!("'{raw}' is not a port number"),
            })?,
            None => 993,
        };

        Ok(Self {
            host: required("EMAIL_IMAP_HOST")?,
            port,
            username: required("EMAIL_USERNAME")?,
            password: SecretString::from(required("EMAIL_PASSWORD")?),
            folder: get("EMAIL_IMAP_FOLDER").unwrap_or_else(|| "INBOX".to_string()),
        })
    }
}

/// Read-only IMAP message source.
pub struct ImapSource {
    config: ImapConfig,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_batch(&self, max_count: u32) -> Result<Vec<NormalizedMessage>, ChannelError> {
        let config = self.config.clone();
        let messages = tokio::task::spawn_blocking(move || {
            let stream = connect_tls(&config)?;
            fetch_recent(&mut ImapSession::new(stream), &config, max_count)
        })
        .await
        .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))??;

        info!(folder = %self.config.folder, count = messages.len(), "Fetched IMAP messages");
        Ok(messages)
    }
}

fn fetch_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: NAME.to_string(),
        reason: reason.into(),
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn connect_tls(config: &ImapConfig) -> Result<TlsStream, ChannelError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| fetch_failed(format!("connect {}:{}: {e}", config.host, config.port)))?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| fetch_failed(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| fetch_failed(format!("invalid host '{}': {e}", config.host)))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| fetch_failed(format!("TLS setup: {e}")))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

// ── Protocol ────────────────────────────────────────────────────────

/// Completed command: untagged lines, any literals, and the tagged status.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status
            .split_whitespace()
            .nth(1)
            .is_some_and(|s| s.eq_ignore_ascii_case("OK"))
    }
}

/// Minimal synchronous IMAP client over any byte stream.
struct ImapSession<S> {
    stream: S,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            next_tag: 1,
        }
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(fetch_failed("IMAP connection closed")),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(fetch_failed(format!("IMAP read: {e}"))),
            }
        }
    }

    fn command(&mut self, cmd: &str) -> Result<Response, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| fetch_failed(format!("IMAP write: {e}")))?;

        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if line.starts_with(&format!("{tag} ")) {
                response.status = line.trim_end().to_string();
                return Ok(response);
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| fetch_failed(format!("IMAP literal read: {e}")))?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }
}

/// Size of a `{N}` literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let inner = line.strip_suffix('}')?;
    let start = inner.rfind('{')?;
    inner[start + 1..].parse().ok()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// UIDs from `* SEARCH` lines.
fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

/// Fetch the `max_count` most recent messages, newest first.
fn fetch_recent<S: Read + Write>(
    session: &mut ImapSession<S>,
    config: &ImapConfig,
    max_count: u32,
) -> Result<Vec<NormalizedMessage>, ChannelError> {
    let _greeting = session.read_line()?;

    let login = session.command(&format!(
        "LOGIN {} {}",
        quote(&config.username),
        quote(config.password.expose_secret())
    ))?;
    if !login.is_ok() {
        return Err(ChannelError::AuthFailed {
            name: NAME.to_string(),
            reason: login.status,
        });
    }

    let examine = session.command(&format!("EXAMINE {}", quote(&config.folder)))?;
    if !examine.is_ok() {
        return Err(fetch_failed(format!(
            "cannot open folder '{}': {}",
            config.folder, examine.status
        )));
    }

    let search = session.command("UID SEARCH ALL")?;
    if !search.is_ok() {
        return Err(fetch_failed(format!("search failed: {}", search.status)));
    }
    let mut uids = parse_search(&search.lines);
    uids.sort_unstable();
    let recent: Vec<u32> = uids.into_iter().rev().take(max_count as usize).collect();
    debug!(folder = %config.folder, count = recent.len(), "IMAP search complete");

    let parser = MessageParser::default();
    let mut messages = Vec::with_capacity(recent.len());
    for uid in recent {
        let fetch = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        if !fetch.is_ok() {
            return Err(fetch_failed(format!("fetch of UID {uid} failed: {}", fetch.status)));
        }

        let raw = fetch.literals.first().map(Vec::as_slice).unwrap_or_default();
        let normalized = match parser.parse(raw) {
            Some(parsed) => normalize_message(uid, &parsed),
            None => {
                warn!(uid, "Unparseable message, using empty fields");
                NormalizedMessage {
                    message_id: fallback_id(uid),
                    recipient: crate::channels::gmail::DEFAULT_RECIPIENT.to_string(),
                    ..Default::default()
                }
            }
        };
        messages.push(normalized);
    }

    // Logout failure is not fatal once messages are read.
    if let Err(e) = session.command("LOGOUT") {
        debug!(error = %e, "IMAP logout failed");
    }
    Ok(messages)
}

fn fallback_id(uid: u32) -> String {
    format!("imap-uid-{uid}")
}

// ── Normalization ───────────────────────────────────────────────────

fn normalize_message(uid: u32, parsed: &Message) -> NormalizedMessage {
    let recipients: Vec<&str> = parsed
        .to()
        .map(|to| to.iter().filter_map(|a| a.address()).collect())
        .unwrap_or_default();

    NormalizedMessage {
        message_id: parsed
            .message_id()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| fallback_id(uid)),
        sender: extract_sender(parsed),
        recipient: if recipients.is_empty() {
            crate::channels::gmail::DEFAULT_RECIPIENT.to_string()
        } else {
            recipients.join(", ")
        },
        subject: parsed.subject().unwrap_or_default().to_string(),
        body: extract_plain_text(parsed),
    }
}

fn extract_sender(parsed: &Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return String::new();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

fn is_plain_text(part: &MessagePart) -> bool {
    match part.content_type() {
        Some(ct) => {
            ct.ctype().eq_ignore_ascii_case("text")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("plain"))
        }
        None => true,
    }
}

/// First non-empty `text/plain` part. HTML-only mail yields `""`.
fn extract_plain_text(parsed: &Message) -> String {
    parsed
        .parts
        .iter()
        .filter(|part| is_plain_text(part))
        .find_map(|part| match &part.body {
            PartType::Text(text) if !text.is_empty() => Some(text.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}
