//! Gmail source: read-only access through the Gmail REST API.
//!
//! Lists message ids under one label, then fetches each message in `full`
//! format and normalizes its headers and plain-text body. Never modifies
//! labels or read state.

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::{MessageSource, NormalizedMessage};

/// Public Gmail API base.
pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Recipient used when a message has no `To` header.
pub const DEFAULT_RECIPIENT: &str = "me";

const NAME: &str = "gmail";

/// Gmail bodies are URL-safe base64, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Configuration ───────────────────────────────────────────────────

/// Gmail source configuration.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    /// OAuth access token with the `gmail.readonly` scope.
    pub access_token: SecretString,
    /// Label scope, e.g. `INBOX`.
    pub label: String,
    pub base_url: String,
}

/// Keys read by [`GmailConfig::from_lookup`].
pub const CONFIG_KEYS: &[&str] = &[
    "GMAIL_ACCESS_TOKEN",
    "GMAIL_TOKEN_PATH",
    "GMAIL_LABEL",
    "GMAIL_API_BASE",
];

impl GmailConfig {
    /// Build config from an arbitrary key lookup. Empty values count as unset.
    ///
    /// The token comes from `GMAIL_ACCESS_TOKEN`, or else from the JSON file
    /// at `GMAIL_TOKEN_PATH` (default `token.json`), field `token` or
    /// `access_token`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let access_token = match get("GMAIL_ACCESS_TOKEN") {
            Some(token) => SecretString::from(token),
            None => {
                let path = get("GMAIL_TOKEN_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("token.json"));
                load_token_file(&path)?
            }
        };

        let label = get("GMAIL_LABEL").unwrap_or_else(|| "INBOX".to_string());
        let base_url = get("GMAIL_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            access_token,
            label,
            base_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    token: Option<String>,
    access_token: Option<String>,
}

/// Read an access token from a stored credentials file.
pub fn load_token_file(path: &std::path::Path) -> Result<SecretString, ConfigError> {
    let missing = || ConfigError::MissingRequired {
        key: "GMAIL_ACCESS_TOKEN".to_string(),
        hint: format!(
            "Set GMAIL_ACCESS_TOKEN or provide a token file at {} (GMAIL_TOKEN_PATH)",
            path.display()
        ),
    };

    if !path.exists() {
        return Err(missing());
    }

    let raw = std::fs::read_to_string(path)?;
    let file: TokenFile = serde_json::from_str(&raw).map_err(|e| ConfigError::InvalidValue {
        key: "GMAIL_TOKEN_PATH".to_string(),
        message: format!("{} is not a token file: {e}", path.display()),
    })?;

    file.token
        .or(file.access_token)
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
        .ok_or_else(missing)
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// A message in Gmail's `full` format.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub payload: Option<GmailPart>,
}

/// One MIME part as Gmail returns it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailPart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<GmailHeader>,
    #[serde(default)]
    pub body: Option<GmailBody>,
    #[serde(default)]
    pub parts: Option<Vec<GmailPart>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailBody {
    #[serde(default)]
    pub data: Option<String>,
}

impl GmailPart {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    fn is_plain_text(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("text/plain"))
    }
}

// ── Normalization ───────────────────────────────────────────────────

/// Normalize a Gmail message. Never fails; absent data becomes `""`.
pub fn normalize_message(message: &GmailMessage) -> NormalizedMessage {
    let payload = message.payload.as_ref();
    let header = |name: &str| {
        payload
            .and_then(|p| p.header(name))
            .unwrap_or_default()
            .to_string()
    };

    let recipient = payload
        .and_then(|p| p.header("to"))
        .filter(|to| !to.trim().is_empty())
        .unwrap_or(DEFAULT_RECIPIENT)
        .to_string();

    NormalizedMessage {
        message_id: message.id.clone(),
        sender: header("from"),
        recipient,
        subject: header("subject"),
        body: payload.map(extract_body_text).unwrap_or_default(),
    }
}

/// Extract the plain-text body of a payload.
///
/// With parts: the first `text/plain` part carrying data. Without parts:
/// the top-level body. Anything undecodable yields `""`.
pub fn extract_body_text(payload: &GmailPart) -> String {
    let data = match &payload.parts {
        Some(parts) => parts.iter().filter(|p| p.is_plain_text()).find_map(GmailPart::data),
        None => payload.data(),
    };

    data.map(decode_body_data).unwrap_or_default()
}

/// Decode URL-safe base64 body data into text, dropping invalid UTF-8.
pub fn decode_body_data(data: &str) -> String {
    match BODY_ENGINE.decode(data.trim()) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).replace(char::REPLACEMENT_CHARACTER, ""),
        Err(e) => {
            warn!(error = %e, "Undecodable body data, using empty body");
            String::new()
        }
    }
}

// ── Source ──────────────────────────────────────────────────────────

/// Read-only Gmail message source.
pub struct GmailSource {
    client: reqwest::Client,
    config: GmailConfig,
}

impl GmailSource {
    pub fn new(config: GmailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ChannelError> {
        let response = request
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ChannelError::AuthFailed {
                name: NAME.to_string(),
                reason: format!("HTTP {status}; the access token is missing, expired or lacks scope"),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(ChannelError::FetchFailed {
                name: NAME.to_string(),
                reason: format!("HTTP {status}: {snippet}"),
            });
        }

        response.json::<T>().await.map_err(|e| ChannelError::FetchFailed {
            name: NAME.to_string(),
            reason: format!("unexpected response shape: {e}"),
        })
    }

    async fn list_ids(&self, max_count: u32) -> Result<Vec<String>, ChannelError> {
        let url = format!("{}/users/me/messages", self.config.base_url);
        let request = self.client.get(url).query(&[
            ("labelIds", self.config.label.clone()),
            ("maxResults", max_count.to_string()),
        ]);

        let list: ListMessagesResponse = self.get_json(request).await?;
        Ok(list
            .messages
            .into_iter()
            .take(max_count as usize)
            .map(|m| m.id)
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<GmailMessage, ChannelError> {
        let url = format!("{}/users/me/messages/{}", self.config.base_url, id);
        let request = self.client.get(url).query(&[("format", "full")]);
        self.get_json(request).await
    }
}

#[async_trait]
impl MessageSource for GmailSource {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch_batch(&self, max_count: u32) -> Result<Vec<NormalizedMessage>, ChannelError> {
        let ids = self.list_ids(max_count).await?;
        info!(label = %self.config.label, count = ids.len(), "Listed Gmail messages");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let detail = self.get_message(&id).await?;
            let normalized = normalize_message(&detail);
            debug!(
                id = %normalized.message_id,
                sender = %normalized.sender,
                body_len = normalized.body.len(),
                "Fetched Gmail message"
            );
            messages.push(normalized);
        }
        Ok(messages)
    }
}
