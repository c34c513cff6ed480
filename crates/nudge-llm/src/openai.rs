use nudge_core::error::{NudgeError, Result};
use reqwest::Client;
use serde_json::json;

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, Usage};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat completion provider.
pub struct OpenAiLlm {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiLlm {
    /// Create a new OpenAI LLM provider.
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key
    /// * `model` - Model identifier (e.g. "gpt-4o-mini")
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

impl LlmProvider for OpenAiLlm {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        chat_completions(
            &self.client,
            OPENAI_CHAT_URL,
            &self.api_key,
            &self.model,
            request,
            "openai",
        )
        .await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// POST an OpenAI-shaped `/chat/completions` request. Shared by every
/// provider that speaks the same wire format.
pub(crate) async fn chat_completions(
    client: &Client,
    url: &str,
    api_key: &str,
    model: &str,
    request: ChatRequest,
    provider: &str,
) -> Result<ChatResponse> {
    let body = request_body(model, &request);
    tracing::debug!(provider, model, "calling chat completions");

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| NudgeError::Llm {
            provider: provider.to_string(),
            message: format!("request failed: {e}"),
        })?;

    let status = response.status().as_u16();
    let response_text = response.text().await.map_err(|e| NudgeError::Llm {
        provider: provider.to_string(),
        message: format!("failed to read response body: {e}"),
    })?;

    if !(200..300).contains(&status) {
        tracing::warn!(provider, status, "chat completions returned non-success status");
        return Err(NudgeError::Http {
            status,
            body: response_text,
        });
    }

    parse_completion(provider, &response_text)
}

fn request_body(model: &str, request: &ChatRequest) -> serde_json::Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = request.max_tokens {
            obj.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if let Some(temp) = request.temperature {
            obj.insert("temperature".to_string(), json!(temp));
        }
    }

    body
}

pub(crate) fn parse_completion(provider: &str, response_text: &str) -> Result<ChatResponse> {
    let parsed: serde_json::Value =
        serde_json::from_str(response_text).map_err(|e| NudgeError::Llm {
            provider: provider.to_string(),
            message: format!("failed to parse response JSON: {e}"),
        })?;

    let choice = parsed["choices"]
        .as_array()
        .and_then(|arr| arr.first())
        .ok_or_else(|| NudgeError::Llm {
            provider: provider.to_string(),
            message: "missing choices[0] in response".to_string(),
        })?;

    // A null content is a valid (empty) completion
    let content = choice["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let usage = match (
        parsed["usage"]["prompt_tokens"].as_u64(),
        parsed["usage"]["completion_tokens"].as_u64(),
    ) {
        (Some(input), Some(output)) => Some(Usage {
            input_tokens: input as u32,
            output_tokens: output as u32,
        }),
        _ => None,
    };

    Ok(ChatResponse { content, usage })
}
