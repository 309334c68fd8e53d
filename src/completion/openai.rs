//! OpenAI-compatible chat completion client.
//!
//! Works with any endpoint exposing `POST {base_url}/chat/completions`.

use serde::{Deserialize, Serialize};
use tracing::debug;
use ureq::Agent;

use super::{ChatMessage, Completion, CompletionService, GenerationParams, Usage};
use crate::config::CompletionConfig;
use crate::error::{PlaybookError, Result};
use crate::http;
use crate::retry::RetryPolicy;

/// Blocking chat completion client.
pub struct OpenAiCompletion {
    config: CompletionConfig,
    retry: RetryPolicy,
    agent: Agent,
}

impl std::fmt::Debug for OpenAiCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompletion")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompletion {
    /// Creates a client. No request is made until the first call.
    pub fn new(config: CompletionConfig, retry: RetryPolicy) -> Self {
        let agent = http::agent(config.timeout);
        Self {
            config,
            retry,
            agent,
        }
    }

    fn completion_from(&self, response: ChatResponse) -> Result<Completion> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PlaybookError::completion("no choices in response"))?;
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: response.usage.unwrap_or_default(),
            model: response
                .model
                .unwrap_or_else(|| self.config.model.clone()),
        })
    }
}

impl CompletionService for OpenAiCompletion {
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<Completion> {
        let key = http::api_key(&self.config.api_key_env).map_err(PlaybookError::completion)?;
        let url = http::endpoint(&self.config.base_url, "chat/completions");
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
        };

        debug!(model = %self.config.model, messages = messages.len(), "Sending completion request");

        let response: ChatResponse = self.retry.run("chat completion", || {
            http::post_json(&self.agent, &url, &key, &request).map_err(PlaybookError::completion)
        })?;

        self.completion_from(response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
