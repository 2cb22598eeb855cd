//! Triage pipeline.
//!
//! Every fetched message flows through:
//! 1. `CsvLedger::is_seen()`: dedup, before any model call
//! 2. `Classifier::classify()`: model output → `TriageOutcome` via the
//!    recovery cascade (strict JSON, embedded object, raw sentinel)
//! 3. `plan_for_outcome()`: deterministic, human-readable next step
//! 4. `CsvLedger::append()`: one flushed row per message
//!
//! **Read-only.** Nothing here labels, moves, replies to or marks messages.

pub mod classifier;
pub mod planner;
pub mod poller;
pub mod processor;
pub mod recovery;
pub mod types;

pub use classifier::{Classifier, HttpClassifier, LlmClassifier};
pub use processor::{BatchAborted, BatchReport, TriageProcessor};
