//! Recovery of a structured decision from free-form model output.
//!
//! Stages, first success wins:
//! 1. The whole text is a JSON object.
//! 2. The span from the first `{` to the last `}` is a JSON object.
//! 3. Neither: the text is kept verbatim as an inconclusive outcome.
//!
//! Pure string parsing, no LLM calls. Never fails.

use tracing::{debug, warn};

use crate::pipeline::types::TriageOutcome;

/// Which stage of the cascade produced the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    Strict,
    Embedded,
    Raw,
}

/// Recover a triage outcome from model output.
pub fn recover_outcome(text: &str) -> TriageOutcome {
    recover_with_stage(text).0
}

/// Like [`recover_outcome`], also reporting the stage that succeeded.
pub fn recover_with_stage(text: &str) -> (TriageOutcome, RecoveryStage) {
    if let Some(outcome) = parse_object(text) {
        return (outcome, RecoveryStage::Strict);
    }

    if let Some(candidate) = embedded_object_span(text)
        && let Some(outcome) = parse_object(candidate)
    {
        debug!("Recovered triage JSON embedded in surrounding text");
        return (outcome, RecoveryStage::Embedded);
    }

    warn!(
        raw_len = text.len(),
        "Model output is not recoverable JSON, keeping raw text"
    );
    (
        TriageOutcome::Inconclusive {
            raw_output: text.to_string(),
        },
        RecoveryStage::Raw,
    )
}

/// The substring from the first `{` to the last `}`, inclusive.
///
/// `None` when either brace is missing or the last `}` precedes the first `{`.
pub fn embedded_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_object(text: &str) -> Option<TriageOutcome> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    TriageOutcome::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{Category, SuggestedAction, TriageDecision};

    const DECISION_JSON: &str = r#"{"category": "archive", "priority": "low", "labels": ["NEWSLETTER"], "summary": "Weekly sale.", "reply_draft": "", "confidence": 0.93, "suggested_action": "label_only"}"#;

    #[test]
    fn strict_json_matches_direct_parse() {
        let (outcome, stage) = recover_with_stage(DECISION_JSON);
        let direct: TriageDecision = serde_json::from_str(DECISION_JSON).unwrap();
        assert_eq!(stage, RecoveryStage::Strict);
        assert_eq!(outcome, TriageOutcome::Decided(direct));
    }

    #[test]
    fn strict_json_tolerates_surrounding_whitespace() {
        let text = format!("\n  {DECISION_JSON}\n");
        let (_, stage) = recover_with_stage(&text);
        assert_eq!(stage, RecoveryStage::Strict);
    }

    #[test]
    fn embedded_json_in_prose() {
        let text = format!("Sure! Here is the triage:\n{DECISION_JSON}\nLet me know if you need more.");
        let (outcome, stage) = recover_with_stage(&text);
        assert_eq!(stage, RecoveryStage::Embedded);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::Archive));
        assert_eq!(decision.suggested_action, Some(SuggestedAction::LabelOnly));
    }

    #[test]
    fn embedded_json_in_markdown_fence() {
        let text = format!("```json\n{DECISION_JSON}\n```");
        let (outcome, stage) = recover_with_stage(&text);
        assert_eq!(stage, RecoveryStage::Embedded);
        assert!(outcome.decision().unwrap().has_label("NEWSLETTER"));
    }

    #[test]
    fn span_runs_from_first_open_to_last_close() {
        let text = "a {\"x\": {\"y\": 1}} b } c";
        assert_eq!(embedded_object_span(text), Some("{\"x\": {\"y\": 1}} b }"));
    }

    #[test]
    fn span_requires_close_after_open() {
        assert_eq!(embedded_object_span("} then {"), None);
        assert_eq!(embedded_object_span("no braces here"), None);
        assert_eq!(embedded_object_span("only { open"), None);
    }

    #[test]
    fn span_that_overshoots_degrades_to_raw() {
        // The last `}` belongs to trailing prose, so the span is not valid JSON.
        let text = format!("{DECISION_JSON} and a stray }}");
        let (outcome, stage) = recover_with_stage(&text);
        assert_eq!(stage, RecoveryStage::Raw);
        assert_eq!(
            outcome,
            TriageOutcome::Inconclusive {
                raw_output: text.clone()
            }
        );
    }

    #[test]
    fn text_without_braces_is_kept_verbatim() {
        let text = "I cannot classify this email.";
        assert_eq!(
            recover_outcome(text),
            TriageOutcome::Inconclusive {
                raw_output: text.into()
            }
        );
    }

    #[test]
    fn empty_text_is_inconclusive() {
        assert!(recover_outcome("").is_inconclusive());
    }

    #[test]
    fn json_array_is_not_a_decision() {
        let (outcome, stage) = recover_with_stage(r#"[{"category": "spam"}]"#);
        // Stage 2 finds the inner object.
        assert_eq!(stage, RecoveryStage::Embedded);
        assert_eq!(
            outcome.decision().unwrap().category,
            Some(Category::Spam)
        );
    }

    #[test]
    fn unknown_enum_values_pass_through() {
        let outcome = recover_outcome(r#"{"category": "escalate", "suggested_action": "call_boss"}"#);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::Other("escalate".into())));
        assert_eq!(
            decision.suggested_action,
            Some(SuggestedAction::Other("call_boss".into()))
        );
    }

    #[test]
    fn null_reply_draft_still_decides() {
        let text = r#"{"category": "spam", "priority": "low", "labels": ["SPAM"], "summary": "Scam.", "reply_draft": null, "confidence": 0.97, "suggested_action": "ignore"}"#;
        let (outcome, stage) = recover_with_stage(text);
        assert_eq!(stage, RecoveryStage::Strict);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::Spam));
        assert_eq!(decision.suggested_action, Some(SuggestedAction::Ignore));
        assert_eq!(decision.reply_draft, "");
        assert_eq!(decision.confidence, 0.97);
    }

    #[test]
    fn null_labels_become_empty() {
        let text = r#"{"category": "archive", "labels": null, "confidence": 0.8, "suggested_action": "label_only"}"#;
        let (outcome, stage) = recover_with_stage(text);
        assert_eq!(stage, RecoveryStage::Strict);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::Archive));
        assert!(decision.labels.is_empty());
    }

    #[test]
    fn numeric_string_confidence_is_parsed() {
        let text = format!(
            "Result: {}",
            r#"{"category": "forward", "confidence": "0.9", "suggested_action": "needs_forward"}"#
        );
        let (outcome, stage) = recover_with_stage(&text);
        assert_eq!(stage, RecoveryStage::Embedded);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::Forward));
        assert_eq!(decision.confidence, 0.9);
    }

    #[test]
    fn null_summary_and_priority_take_defaults() {
        let (outcome, stage) =
            recover_with_stage(r#"{"category": "respond_later", "priority": null, "summary": null}"#);
        assert_eq!(stage, RecoveryStage::Strict);
        let decision = outcome.decision().unwrap();
        assert_eq!(decision.category, Some(Category::RespondLater));
        assert_eq!(decision.priority, None);
        assert_eq!(decision.summary, "");
    }

    #[test]
    fn degraded_shape_round_trips() {
        let outcome = recover_outcome(r#"{"raw_output": "model said hi"}"#);
        assert_eq!(
            outcome,
            TriageOutcome::Inconclusive {
                raw_output: "model said hi".into()
            }
        );
    }
}
