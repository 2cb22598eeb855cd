//! Action planning: turns a triage decision into a human-readable next step.
//!
//! Pure functions only. Rules, first match wins:
//! 1. `label_only` with a `NEWSLETTER` label → label and consider archiving
//! 2. `needs_reply` → reply queue
//! 3. `needs_forward` → forward
//! 4. anything else → no automatic action

use crate::pipeline::types::{ActionPlan, SuggestedAction, TriageDecision, TriageOutcome};

pub const PLAN_NEWSLETTER: &str = "Apply label [NEWSLETTER] and consider archiving.";
pub const PLAN_REPLY: &str = "Add to reply queue (manual follow-up needed).";
pub const PLAN_FORWARD: &str = "Forward to the appropriate team/address.";
pub const PLAN_NONE: &str = "No automatic action, leave as is for now.";

/// Derive the action plan for a decision.
pub fn plan_for(decision: &TriageDecision) -> ActionPlan {
    let plan = match decision.suggested_action.as_ref() {
        Some(SuggestedAction::LabelOnly) if decision.has_label("NEWSLETTER") => PLAN_NEWSLETTER,
        Some(SuggestedAction::NeedsReply) => PLAN_REPLY,
        Some(SuggestedAction::NeedsForward) => PLAN_FORWARD,
        _ => PLAN_NONE,
    };

    ActionPlan {
        plan: plan.to_string(),
        action: decision.suggested_action.clone(),
        labels: decision.labels.clone(),
        category: decision.category.clone(),
        confidence: decision.confidence,
    }
}

/// Derive the action plan for any outcome; inconclusive ones get no action.
pub fn plan_for_outcome(outcome: &TriageOutcome) -> ActionPlan {
    match outcome {
        TriageOutcome::Decided(decision) => plan_for(decision),
        TriageOutcome::Inconclusive { .. } => plan_for(&TriageDecision::default()),
    }
}
