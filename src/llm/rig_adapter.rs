//! Bridges rig's `CompletionModel` trait to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;

use crate::error::LlmError;
use crate::llm::provider::LlmProvider;

/// Output cap for one triage answer. Anthropic requires an explicit value.
const MAX_TOKENS: u64 = 1024;

/// Adapter over any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    temperature: f64,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str, temperature: f64) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            temperature,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, prompt: &str, policy: &str) -> Result<String, LlmError> {
        let response = self
            .model
            .completion_request(prompt.to_string())
            .preamble(policy.to_string())
            .temperature(self.temperature)
            .max_tokens(MAX_TOKENS)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })?;

        let text: String = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();

        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "completion contained no text".to_string(),
            });
        }

        tracing::debug!(model = %self.model_name, chars = text.len(), "Completion received");
        Ok(text)
    }
}
