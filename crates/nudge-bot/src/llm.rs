use std::future::Future;

use nudge_core::config::LlmConfig;
use nudge_core::error::{NudgeError, Result};
use nudge_llm::huggingface::HuggingFaceLlm;
use nudge_llm::openai::OpenAiLlm;
use nudge_llm::provider::{ChatMessage, ChatRequest, LlmProvider};

const SYSTEM_PROMPT: &str = "You are a concise assistant for a Microsoft Teams bot.";
const MAX_TOKENS: u32 = 256;
const TEMPERATURE: f32 = 0.5;

/// Turns a user prompt into reply text. Never fails: problems become text.
pub trait Completion: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = String> + Send;
}

/// Completion backed by the configured LLM provider.
pub struct LlmDispatch {
    config: LlmConfig,
    huggingface: Option<HuggingFaceLlm>,
    openai: Option<OpenAiLlm>,
}

impl LlmDispatch {
    pub fn new(config: LlmConfig) -> Self {
        let huggingface = (config.provider == "huggingface")
            .then(|| HuggingFaceLlm::new(config.api_key.clone(), config.model.clone()));
        let openai = (config.provider == "openai")
            .then(|| OpenAiLlm::new(config.api_key.clone(), config.model.clone()));
        Self {
            config,
            huggingface,
            openai,
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let provider = &self.config.provider;
        let model = &self.config.model;
        tracing::info!("[LLM] calling {provider}/{model}");

        let request = ChatRequest {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            max_tokens: Some(MAX_TOKENS),
            temperature: Some(TEMPERATURE),
        };

        let response = if let Some(hf) = &self.huggingface {
            hf.chat(request).await?
        } else if let Some(openai) = &self.openai {
            openai.chat(request).await?
        } else {
            return Err(NudgeError::Config(format!(
                "unknown LLM provider: '{provider}'. Supported: huggingface, openai"
            )));
        };

        if let Some(usage) = response.usage {
            tracing::debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "[LLM] OK"
            );
        }
        Ok(response.content)
    }
}

impl Completion for LlmDispatch {
    async fn complete(&self, prompt: &str) -> String {
        if self.config.api_key.is_empty() {
            return format!("(no LLM key set) You said: {prompt}");
        }
        reply_text(self.chat(prompt).await)
    }
}

/// Map a completion result onto what the user sees.
fn reply_text(result: Result<String>) -> String {
    match result {
        Ok(text) => {
            let text = text.trim();
            if text.is_empty() {
                "Sorry, I couldn't generate a response.".to_string()
            } else {
                text.to_string()
            }
        }
        Err(e) => {
            tracing::warn!("[LLM] ERROR: {e}");
            format!("(LLM error: {e})")
        }
    }
}
