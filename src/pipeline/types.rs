//! Shared types for the triage pipeline.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

// ── Normalized message ──────────────────────────────────────────────

/// A mailbox message reduced to what triage needs.
///
/// Sources convert their native format into this struct. Missing headers
/// become empty strings; a message without a plain-text part has an empty body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Mailbox-assigned identifier, unique per mailbox.
    pub message_id: String,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    /// Plain-text body, possibly empty.
    pub body: String,
}

/// Wire payload for the classification endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageRequest {
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl TriageRequest {
    /// Attach an identifier, producing a message the classifier can consume.
    pub fn into_message(self, message_id: impl Into<String>) -> NormalizedMessage {
        NormalizedMessage {
            message_id: message_id.into(),
            sender: self.sender,
            recipient: self.recipient,
            subject: self.subject,
            body: self.body,
        }
    }
}

impl From<&NormalizedMessage> for TriageRequest {
    fn from(message: &NormalizedMessage) -> Self {
        Self {
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
        }
    }
}

// ── Decision enums ──────────────────────────────────────────────────

/// Defines a string-backed enum that keeps unrecognized values verbatim.
macro_rules! passthrough_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            /// A value outside the known set, kept as the backend sent it.
            Other(String),
        }

        impl $name {
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(raw) => raw,
                }
            }

            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                match raw.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Other(raw),
                }
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::from(raw.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

passthrough_enum! {
    /// Triage bucket for a message.
    Category {
        RespondNow => "respond_now",
        RespondLater => "respond_later",
        Forward => "forward",
        Archive => "archive",
        Spam => "spam",
    }
}

passthrough_enum! {
    /// How urgently the message deserves attention.
    Priority {
        High => "high",
        Medium => "medium",
        Low => "low",
    }
}

passthrough_enum! {
    /// Next step the model recommends.
    SuggestedAction {
        LabelOnly => "label_only",
        NeedsReply => "needs_reply",
        NeedsForward => "needs_forward",
        Ignore => "ignore",
    }
}

// ── Triage decision ─────────────────────────────────────────────────

/// Structured decision recovered from the model's output.
///
/// Fields absent from the model's JSON take their defaults, and so do
/// `null`s. Scalars of the wrong type are coerced where the intent is clear
/// (`"0.9"` confidence, a bare string for `labels`). Enum values outside the
/// known sets are kept as `Other(..)` rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageDecision {
    #[serde(
        default,
        deserialize_with = "lenient_enum",
        skip_serializing_if = "Option::is_none"
    )]
    pub category: Option<Category>,
    #[serde(
        default,
        deserialize_with = "lenient_enum",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "lenient_labels")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub reply_draft: String,
    #[serde(default, deserialize_with = "lenient_confidence")]
    pub confidence: f64,
    #[serde(
        default,
        deserialize_with = "lenient_enum",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_action: Option<SuggestedAction>,
}

/// Scalar rendered as text; `null` and containers yield `None`.
fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn lenient_enum<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_text(value)
        .filter(|s| !s.is_empty())
        .map(T::from))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(scalar_text(value).unwrap_or_default())
}

fn lenient_labels<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let labels = match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    };
    Ok(labels)
}

fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let confidence = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(confidence.filter(|c| c.is_finite()).unwrap_or_default())
}

impl TriageDecision {
    /// Whether `label` is present (exact match).
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Enum values the backend returned that fall outside the known sets,
    /// as `(field, value)` pairs.
    pub fn unknown_values(&self) -> Vec<(&'static str, &str)> {
        let mut unknown = Vec::new();
        if let Some(c) = self.category.as_ref().filter(|c| !c.is_known()) {
            unknown.push(("category", c.as_str()));
        }
        if let Some(p) = self.priority.as_ref().filter(|p| !p.is_known()) {
            unknown.push(("priority", p.as_str()));
        }
        if let Some(a) = self.suggested_action.as_ref().filter(|a| !a.is_known()) {
            unknown.push(("suggested_action", a.as_str()));
        }
        unknown
    }
}

// ── Triage outcome ──────────────────────────────────────────────────

/// Result of classifying one message.
///
/// `Inconclusive` is not an error: the backend answered, but nothing
/// structured could be recovered from its text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TriageOutcome {
    Decided(TriageDecision),
    Inconclusive { raw_output: String },
}

impl TriageOutcome {
    /// Interpret a parsed JSON value.
    ///
    /// Only objects are accepted. An object carrying `raw_output` and no
    /// `category` is the degraded shape; anything else must deserialize
    /// into a `TriageDecision`.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(map) = value else {
            return None;
        };

        if !map.contains_key("category")
            && let Some(raw) = map.get("raw_output").and_then(|v| v.as_str())
        {
            return Some(Self::Inconclusive {
                raw_output: raw.to_string(),
            });
        }

        serde_json::from_value(serde_json::Value::Object(map))
            .ok()
            .map(Self::Decided)
    }

    pub fn decision(&self) -> Option<&TriageDecision> {
        match self {
            Self::Decided(decision) => Some(decision),
            Self::Inconclusive { .. } => None,
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Self::Inconclusive { .. })
    }
}

// ── Action plan ─────────────────────────────────────────────────────

/// Human-readable next step derived from a decision. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionPlan {
    pub plan: String,
    pub action: Option<SuggestedAction>,
    pub labels: Vec<String>,
    pub category: Option<Category>,
    pub confidence: f64,
}

// ── Processed message ───────────────────────────────────────────────

/// A message that made it through classification and into the ledger.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub message: NormalizedMessage,
    pub outcome: TriageOutcome,
    pub plan: ActionPlan,
    pub processed_at: DateTime<Utc>,
}

// ── Message source trait ────────────────────────────────────────────

/// Trait for mailbox sources: pure read-only I/O, no business logic.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Source name (e.g. "gmail", "imap").
    fn name(&self) -> &str;

    /// Fetch up to `max_count` messages from the configured folder scope.
    ///
    /// Never mutates mailbox state. A message whose body cannot be decoded
    /// is returned with an empty body instead of failing the batch.
    async fn fetch_batch(&self, max_count: u32) -> Result<Vec<NormalizedMessage>, ChannelError>;
}
