//! The narrow interface between the classifier and a text-generation backend.

use async_trait::async_trait;

use crate::error::LlmError;

/// A text-generation backend.
///
/// Implementations send `prompt` as the user turn and `policy` as the
/// system instruction, and return the model's raw text. Interpreting that
/// text is the caller's job.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt` under the instruction `policy`.
    async fn generate(&self, prompt: &str, policy: &str) -> Result<String, LlmError>;
}
