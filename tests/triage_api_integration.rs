//! Integration tests for the classification service and the pull cycle.
//!
//! Each test spins up an Axum server on a random port with a stub model,
//! then drives it through `HttpClassifier` exactly as `pull` does when
//! `TRIAGE_API_URL` is set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use mail_triage::api::triage_routes;
use mail_triage::error::{ChannelError, LlmError, PipelineError};
use mail_triage::llm::LlmProvider;
use mail_triage::pipeline::planner::{PLAN_NEWSLETTER, PLAN_NONE, PLAN_REPLY};
use mail_triage::pipeline::types::{Category, MessageSource, NormalizedMessage, SuggestedAction};
use mail_triage::pipeline::{Classifier, HttpClassifier, LlmClassifier, TriageProcessor};
use mail_triage::store::CsvLedger;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub model keyed on the rendered prompt (no real API calls).
struct StubLlm;

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, prompt: &str, policy: &str) -> Result<String, LlmError> {
        assert!(policy.contains("@company.com"), "policy not forwarded");

        if prompt.contains("From: promo@shop.com") {
            return Ok(concat!(
                "```json\n",
                r#"{"category": "archive", "priority": "low", "labels": ["NEWSLETTER"], "#,
                r#""summary": "Marketing sale", "reply_draft": "", "confidence": 0.95, "#,
                r#""suggested_action": "label_only"}"#,
                "\n```"
            )
            .to_string());
        }
        if prompt.contains("Subject: outage") {
            return Err(LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "upstream 500".into(),
            });
        }
        if prompt.contains("Subject: ???") {
            return Ok("I'd rather not say.".to_string());
        }
        Ok(r#"{"category": "respond_now", "priority": "high", "labels": ["WORK"], "summary": "Budget question", "reply_draft": "Will check.", "confidence": 0.82, "suggested_action": "needs_reply"}"#.to_string())
    }
}

struct FixedSource(Vec<NormalizedMessage>);

#[async_trait]
impl MessageSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_batch(&self, max_count: u32) -> Result<Vec<NormalizedMessage>, ChannelError> {
        Ok(self.0.iter().take(max_count as usize).cloned().collect())
    }
}

/// Start an Axum server on a random port, return the triage endpoint URL.
async fn start_server() -> String {
    let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm);
    let classifier = Arc::new(LlmClassifier::new(
        llm,
        mail_triage::pipeline::classifier::triage_policy("company.com"),
    ));
    let app = triage_routes(classifier);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}/triage-email")
}

fn message(id: &str, sender: &str, subject: &str, body: &str) -> NormalizedMessage {
    NormalizedMessage {
        message_id: id.into(),
        sender: sender.into(),
        recipient: "me@company.com".into(),
        subject: subject.into(),
        body: body.into(),
    }
}

#[tokio::test]
async fn promo_email_is_archived_over_http() {
    timeout(TEST_TIMEOUT, async {
        let endpoint = start_server().await;
        let classifier = HttpClassifier::new(endpoint);

        let outcome = classifier
            .classify(&message(
                "m1",
                "promo@shop.com",
                "50% OFF",
                "Huge sale on everything, shop now!",
            ))
            .await
            .unwrap();

        let decision = outcome.decision().expect("expected a decision");
        assert_eq!(decision.category, Some(Category::Archive));
        assert_eq!(decision.suggested_action, Some(SuggestedAction::LabelOnly));
        assert!(decision.has_label("NEWSLETTER"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unparseable_answer_comes_back_as_raw_output() {
    timeout(TEST_TIMEOUT, async {
        let endpoint = start_server().await;

        let response: Value = reqwest::Client::new()
            .post(&endpoint)
            .json(&serde_json::json!({"sender": "x@y.z", "subject": "???"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, serde_json::json!({"raw_output": "I'd rather not say."}));

        let outcome = HttpClassifier::new(endpoint)
            .classify(&message("m2", "x@y.z", "???", ""))
            .await
            .unwrap();
        assert!(outcome.is_inconclusive());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn backend_failure_surfaces_as_endpoint_status() {
    timeout(TEST_TIMEOUT, async {
        let endpoint = start_server().await;

        let err = HttpClassifier::new(endpoint)
            .classify(&message("m3", "ops@company.com", "outage", "down"))
            .await
            .unwrap_err();

        match err {
            PipelineError::EndpointStatus { status, body } => {
                assert_eq!(status, 502);
                assert!(body.contains("upstream 500"));
            }
            other => panic!("Expected EndpointStatus, got {other:?}"),
        }
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn pull_cycle_through_service_logs_each_message_once() {
    timeout(TEST_TIMEOUT, async {
        let endpoint = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage_log.csv");

        let source = Arc::new(FixedSource(vec![
            message("m1", "promo@shop.com", "50% OFF", "Sale!"),
            message("m2", "boss@company.com", "Budget", "Can you review?"),
            message("m3", "x@y.z", "???", ""),
        ]));
        let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(endpoint));

        let mut first = TriageProcessor::new(
            source.clone(),
            Arc::clone(&classifier),
            CsvLedger::open(&path).unwrap(),
        );
        let report = first.run_batch(10).await.unwrap();

        let plans: Vec<&str> = report.processed.iter().map(|p| p.plan.plan.as_str()).collect();
        assert_eq!(plans, vec![PLAN_NEWSLETTER, PLAN_REPLY, PLAN_NONE]);

        // A second run over the same mailbox classifies nothing new.
        let mut second = TriageProcessor::new(source, classifier, CsvLedger::open(&path).unwrap());
        let report = second.run_batch(10).await.unwrap();
        assert_eq!(report.skipped, 3);
        assert!(report.processed.is_empty());

        let entries = second.ledger().entries().unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert_eq!(entries[0].labels, vec!["NEWSLETTER"]);
        assert_eq!(entries[1].suggested_action.as_deref(), Some("needs_reply"));
        assert!(entries[2].category.is_none());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_endpoint_responds() {
    timeout(TEST_TIMEOUT, async {
        let endpoint = start_server().await;
        let health = endpoint.replace("/triage-email", "/health");

        let body: Value = reqwest::get(&health).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}
