use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LLMError;
use crate::history::ProviderMessage;

pub mod anthropic_messages;
pub mod openai_chat;

use anthropic_messages::AnthropicMessages;
use openai_chat::OpenAiChat;

/// Inputs of [`Transform::payload`], already converted to the provider's content shape.
#[derive(Debug, Clone, Default)]
pub struct PayloadParts<'a> {
    /// Query content produced by [`Transform::content`].
    pub content: Option<Value>,
    pub system: Option<&'a str>,
    pub prefill: Option<&'a str>,
    pub prediction: Option<&'a str>,
    /// History produced by [`crate::history::convert`].
    pub history: Option<Vec<ProviderMessage>>,
}

/// 统一的 Provider 转换接口 每种线格式实现一次
///
/// Implementations are stateless and shared by every request; they only reshape JSON.
/// Response and stream extractors report shape mismatches as [`LLMError::Provider`].
pub trait Transform: Send + Sync {
    /// Name used in error reports.
    fn name(&self) -> &'static str;

    /// Builds message content from text and an optional canonical image URI.
    ///
    /// Without an image the result is a bare JSON string, never a wrapped array.
    fn content(&self, text: &str, image: Option<&str>) -> Value;

    /// Builds the message-bearing part of the body.
    fn payload(&self, parts: PayloadParts<'_>) -> Result<Map<String, Value>, LLMError>;

    /// Extracts the reply text of a non-streaming response.
    fn response(&self, reply: &Value) -> Result<String, LLMError>;

    /// Extracts the text delta of one stream event; `""` when the event carries no text.
    fn stream(&self, event: &Value) -> Result<String, LLMError>;

    /// Whether `event` ends the stream cleanly, in addition to the `[DONE]` sentinel.
    fn is_terminal(&self, _event: &Value) -> bool {
        false
    }

    /// Extracts embedding vectors, in input order.
    fn embeddings(&self, _reply: &Value) -> Result<Vec<Vec<f32>>, LLMError> {
        Err(LLMError::provider(
            self.name(),
            "embeddings are not part of this wire format",
        ))
    }

    /// Extracts token ids of a tokenization response.
    fn tokens(&self, reply: &Value) -> Result<Vec<i64>, LLMError> {
        reply
            .get("tokens")
            .and_then(Value::as_array)
            .and_then(|tokens| tokens.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
            .ok_or_else(|| LLMError::provider(self.name(), "tokenize reply has no `tokens` list"))
    }

    /// Extracts the text of a transcription response.
    fn transcript(&self, reply: &Value) -> Result<String, LLMError> {
        reply
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                LLMError::provider(self.name(), "transcription reply has no `text` field")
            })
    }
}

/// 线格式族 每个 Provider 选择其一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    /// OpenAI Chat Completions and the many servers compatible with it.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic Messages.
    #[serde(rename = "anthropic")]
    Anthropic,
}

impl Dialect {
    /// Returns the shared transform for this dialect.
    pub fn transform(self) -> &'static dyn Transform {
        match self {
            Self::OpenAi => &OpenAiChat,
            Self::Anthropic => &AnthropicMessages,
        }
    }
}
