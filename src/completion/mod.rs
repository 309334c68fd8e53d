//! Text completion capability.
//!
//! The playbook itself never needs a language model. A completion service
//! is used by the reflector's model-backed path and by
//! [`CompletionGenerator`](crate::pipeline::CompletionGenerator); both work
//! against the [`CompletionService`] trait so tests can swap in stubs.

#[cfg(feature = "http-providers")]
pub mod openai;

#[cfg(feature = "http-providers")]
pub use openai::OpenAiCompletion;

use serde::{Deserialize, Serialize};

use crate::config::{CompletionConfig, Config};
use crate::error::Result;

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions framing the exchange.
    System,
    /// The requesting side.
    User,
    /// The model.
    Assistant,
}

/// One role-tagged message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote it.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling parameters for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Output token cap.
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::from(&CompletionConfig::default())
    }
}

impl From<&CompletionConfig> for GenerationParams {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
        }
    }
}

impl GenerationParams {
    /// Same parameters with a different output cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the request.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens in the reply.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Sum reported by the provider.
    #[serde(default)]
    pub total_tokens: u64,
}

/// A completed request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    /// Reply text.
    pub content: String,
    /// Token usage.
    pub usage: Usage,
    /// Model that answered.
    pub model: String,
}

/// Chat completion provider.
pub trait CompletionService: Send + Sync {
    /// Sends `messages` and returns the reply.
    ///
    /// # Errors
    ///
    /// Returns `PlaybookError::Completion` once the retry budget is spent.
    fn complete(&self, messages: &[ChatMessage], params: &GenerationParams) -> Result<Completion>;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;
}

/// Creates the completion service named by `config.completion`, if any.
///
/// # Errors
///
/// Returns a `Config` error if a model is configured but the
/// `http-providers` feature is disabled.
pub fn create_completion_service(config: &Config) -> Result<Option<Box<dyn CompletionService>>> {
    let Some(completion) = &config.completion else {
        return Ok(None);
    };

    #[cfg(feature = "http-providers")]
    {
        Ok(Some(Box::new(OpenAiCompletion::new(
            completion.clone(),
            config.retry.clone(),
        ))))
    }

    #[cfg(not(feature = "http-providers"))]
    {
        let _ = completion;
        Err(crate::error::PlaybookError::config(
            "completion requires the 'http-providers' feature",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("x")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }

    #[test]
    fn test_params_from_config() {
        let config = CompletionConfig {
            temperature: 0.5,
            max_tokens: 10,
            ..Default::default()
        };
        let params = GenerationParams::from(&config);
        assert_eq!(params.temperature, 0.5);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.with_max_tokens(99).max_tokens, 99);
    }

    #[test]
    fn test_no_completion_configured() {
        assert!(create_completion_service(&Config::default())
            .unwrap()
            .is_none());
    }
}
