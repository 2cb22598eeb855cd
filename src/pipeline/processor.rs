//! Triage processor: one polling cycle over a mailbox.
//!
//! Flow per message, strictly sequential and in fetch order:
//! 1. Ledger dedup (already seen → skip, no model call)
//! 2. Classification → `TriageOutcome`
//! 3. Planning → `ActionPlan`
//! 4. Ledger append (one flushed row)

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::planner::plan_for_outcome;
use crate::pipeline::types::{MessageSource, NormalizedMessage, ProcessedMessage};
use crate::store::CsvLedger;

/// Counts and results of one cycle.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    pub processed: Vec<ProcessedMessage>,
}

/// A cycle that stopped early, with whatever it finished before stopping.
#[derive(Debug, thiserror::Error)]
#[error("Triage cycle aborted after {} of {} messages: {source}", .report.processed.len(), .report.fetched)]
pub struct BatchAborted {
    pub report: BatchReport,
    #[source]
    pub source: PipelineError,
}

/// Runs fetch → dedup → classify → plan → append cycles.
pub struct TriageProcessor {
    source: Arc<dyn MessageSource>,
    classifier: Arc<dyn Classifier>,
    ledger: CsvLedger,
    continue_on_error: bool,
}

impl TriageProcessor {
    pub fn new(
        source: Arc<dyn MessageSource>,
        classifier: Arc<dyn Classifier>,
        ledger: CsvLedger,
    ) -> Self {
        Self {
            source,
            classifier,
            ledger,
            continue_on_error: false,
        }
    }

    /// Log and skip failing messages instead of aborting the cycle.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn ledger(&self) -> &CsvLedger {
        &self.ledger
    }

    /// Run one cycle over at most `max_count` messages.
    ///
    /// A fetch failure aborts before anything is classified. A per-message
    /// failure aborts the rest of the cycle unless continue-on-error is set;
    /// rows already appended stay in the ledger either way, and an aborted
    /// cycle hands back its partial report.
    pub async fn run_batch(&mut self, max_count: u32) -> Result<BatchReport, BatchAborted> {
        let messages = match self.source.fetch_batch(max_count).await {
            Ok(messages) => messages,
            Err(e) => {
                return Err(BatchAborted {
                    report: BatchReport::default(),
                    source: e.into(),
                });
            }
        };
        info!(
            source = self.source.name(),
            classifier = self.classifier.name(),
            count = messages.len(),
            "Processing message batch"
        );

        let mut report = BatchReport {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in messages {
            if self.ledger.is_seen(&message.message_id) {
                debug!(id = %message.message_id, "Already triaged, skipping");
                report.skipped += 1;
                continue;
            }

            match self.process(message).await {
                Ok(processed) => report.processed.push(processed),
                Err(e) if self.continue_on_error => {
                    error!(error = %e, "Failed to process message, continuing");
                    report.failed += 1;
                }
                Err(source) => {
                    warn!(
                        processed = report.processed.len(),
                        skipped = report.skipped,
                        "Batch aborted"
                    );
                    return Err(BatchAborted { report, source });
                }
            }
        }

        info!(
            fetched = report.fetched,
            processed = report.processed.len(),
            skipped = report.skipped,
            failed = report.failed,
            "Batch processing complete"
        );
        Ok(report)
    }

    /// Classify, plan and record a single unseen message.
    async fn process(&mut self, message: NormalizedMessage) -> Result<ProcessedMessage, PipelineError> {
        info!(
            id = %message.message_id,
            sender = %message.sender,
            subject = %message.subject,
            "Triaging message"
        );

        let outcome = self.classifier.classify(&message).await?;
        let plan = plan_for_outcome(&outcome);

        match outcome.decision() {
            Some(decision) => info!(
                id = %message.message_id,
                category = decision.category.as_ref().map(|c| c.as_str()).unwrap_or(""),
                action = decision.suggested_action.as_ref().map(|a| a.as_str()).unwrap_or(""),
                confidence = decision.confidence,
                "Message triaged"
            ),
            None => warn!(id = %message.message_id, "Inconclusive triage, recording without decision"),
        }

        self.ledger
            .append(&message.message_id, &message, &outcome)
            .map_err(|source| PipelineError::LedgerWrite {
                message_id: message.message_id.clone(),
                source,
            })?;

        Ok(ProcessedMessage {
            message,
            outcome,
            plan,
            processed_at: Utc::now(),
        })
    }
}
