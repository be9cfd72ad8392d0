//! Anthropic Messages wire format.

use serde_json::{Map, Value};

use crate::error::LLMError;

use super::{PayloadParts, Transform};

mod request;
mod response;
mod stream;
mod types;

/// Anthropic Messages 转换实现（Claude Messages API）
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicMessages;

impl Transform for AnthropicMessages {
    fn name(&self) -> &'static str {
        "anthropic_messages"
    }

    fn content(&self, text: &str, image: Option<&str>) -> Value {
        request::build_content(text, image)
    }

    fn payload(&self, parts: PayloadParts<'_>) -> Result<Map<String, Value>, LLMError> {
        request::build_payload(parts)
    }

    fn response(&self, reply: &Value) -> Result<String, LLMError> {
        response::extract_text(reply, self.name())
    }

    fn stream(&self, event: &Value) -> Result<String, LLMError> {
        stream::extract_delta(event, self.name())
    }

    fn is_terminal(&self, event: &Value) -> bool {
        stream::is_message_stop(event)
    }
}
