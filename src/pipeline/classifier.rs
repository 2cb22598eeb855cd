//! Triage classifier: turns a normalized message into a triage outcome.
//!
//! Two integration modes share the `Classifier` trait:
//! - `LlmClassifier` calls a model in-process through `LlmProvider`
//! - `HttpClassifier` posts the message to a classification endpoint
//!
//! Both run the model's text through the recovery cascade, so callers see
//! the same `TriageOutcome` either way.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::provider::LlmProvider;
use crate::pipeline::recovery::{recover_outcome, recover_with_stage};
use crate::pipeline::types::{NormalizedMessage, TriageOutcome, TriageRequest};

/// Classifies one message at a time.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Short name for logging ("llm", "http").
    fn name(&self) -> &str;

    /// Classify a message. Unparseable model output is an `Inconclusive`
    /// outcome, not an error; errors mean the backend could not be reached
    /// or refused the request.
    async fn classify(&self, message: &NormalizedMessage) -> Result<TriageOutcome, PipelineError>;
}

// ── Prompt construction ─────────────────────────────────────────────

/// Build the triage instruction policy for an organizational domain.
pub fn triage_policy(org_domain: &str) -> String {
    let domain = org_domain.trim().trim_start_matches('@');
    format!(
        "You triage emails for a busy professional.\n\
         The user will paste the full email text (From, To, Subject, Body).\n\
         You MUST respond with ONLY a JSON object, no extra text, with keys:\n\
         \x20 - category: one of ['respond_now','respond_later','forward','archive','spam']\n\
         \x20 - priority: one of ['high','medium','low']\n\
         \x20 - labels: list of strings like ['WORK','NEWSLETTER','URGENT','SPAM']\n\
         \x20 - summary: brief summary of the email in <= 2 sentences\n\
         \x20 - reply_draft: a short polite reply, or empty string.\n\
         \x20 - confidence: a float between 0 and 1 (e.g., 0.93) representing how confident you are in the category.\n\
         \x20 - suggested_action: one of ['label_only','needs_reply','needs_forward','ignore'].\n\
         \n\
         Rules:\n\
         \x20 - If the email is a marketing campaign, promotion, sales offer, or newsletter, \
         set category='archive', priority='low', labels must include 'NEWSLETTER', \
         suggested_action='label_only', and confidence should usually be >= 0.8.\n\
         \x20 - If the email is clear spam or scam (suspicious links, unrealistic offers), \
         set category='spam', labels should include 'SPAM', suggested_action='ignore', \
         and confidence should usually be >= 0.8.\n\
         \x20 - If the sender domain matches the user's company domain ('@{domain}'), \
         labels should include 'WORK' in addition to any other labels. These are more important by default.\n\
         \x20 - If the email clearly requires you to answer a question or confirm something, \
         use category='respond_now' or 'respond_later' and suggested_action='needs_reply'.\n\
         \x20 - If the email is mainly for another person or team to act on, \
         use category='forward' and suggested_action='needs_forward'.\n\
         \n\
         Do not explain your reasoning, only output JSON."
    )
}

/// Render a message as the plain-text block the model sees.
pub fn render_message(message: &NormalizedMessage) -> String {
    let mut prompt = String::with_capacity(64 + message.body.len());
    prompt.push_str("Here is an email:\n");
    prompt.push_str(&format!("From: {}\n", message.sender));
    prompt.push_str(&format!("To: {}\n", message.recipient));
    prompt.push_str(&format!("Subject: {}\n", message.subject));
    prompt.push_str(&format!("Body:\n{}\n", message.body));
    prompt
}

fn flag_unknown_values(message_id: &str, outcome: &TriageOutcome) {
    if let Some(decision) = outcome.decision() {
        for (field, value) in decision.unknown_values() {
            warn!(
                id = %message_id,
                field,
                value,
                "Backend returned a value outside the known set, passing it through"
            );
        }
    }
}

// ── In-process model ────────────────────────────────────────────────

/// Classifier that calls a model directly.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
    policy: String,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>, policy: impl Into<String>) -> Self {
        Self {
            llm,
            policy: policy.into(),
        }
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        "llm"
    }

    async fn classify(&self, message: &NormalizedMessage) -> Result<TriageOutcome, PipelineError> {
        let prompt = render_message(message);
        debug!(
            id = %message.message_id,
            model = self.llm.model_name(),
            "Requesting triage from model"
        );

        let raw = self.llm.generate(&prompt, &self.policy).await?;
        let (outcome, stage) = recover_with_stage(raw.trim());

        info!(
            id = %message.message_id,
            stage = ?stage,
            inconclusive = outcome.is_inconclusive(),
            "Triage response recovered"
        );
        flag_unknown_values(&message.message_id, &outcome);
        Ok(outcome)
    }
}

// ── Remote endpoint ─────────────────────────────────────────────────

/// Classifier that delegates to a classification endpoint over HTTP.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        "http"
    }

    async fn classify(&self, message: &NormalizedMessage) -> Result<TriageOutcome, PipelineError> {
        let payload = TriageRequest::from(message);
        debug!(id = %message.message_id, endpoint = %self.endpoint, "Posting message to triage endpoint");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PipelineError::Classification(format!("request to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Classification(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            return Err(PipelineError::EndpointStatus {
                status: status.as_u16(),
                body,
            });
        }

        let outcome = recover_outcome(body.trim());
        flag_unknown_values(&message.message_id, &outcome);
        Ok(outcome)
    }
}
