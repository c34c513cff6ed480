use nudge_core::error::Result;
use reqwest::Client;

use crate::openai::chat_completions;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};

/// OpenAI-compatible chat endpoint of the Hugging Face inference router.
const HF_CHAT_URL: &str = "https://router.huggingface.co/v1/chat/completions";

/// Hugging Face hosted inference provider.
pub struct HuggingFaceLlm {
    client: Client,
    api_token: String,
    model: String,
    url: String,
}

impl HuggingFaceLlm {
    pub fn new(api_token: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_token,
            model,
            url: HF_CHAT_URL.to_string(),
        }
    }

    /// Point at a different OpenAI-compatible endpoint (dedicated inference
    /// endpoints, local TGI).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

impl LlmProvider for HuggingFaceLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        chat_completions(
            &self.client,
            &self.url,
            &self.api_token,
            &self.model,
            request,
            "huggingface",
        )
        .await
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}
