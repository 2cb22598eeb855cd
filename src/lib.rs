//! Mail Triage: read-only mailbox triage with an LLM classifier.

pub mod api;
pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
