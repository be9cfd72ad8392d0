//! OpenAI Chat Completions wire format, shared by every OpenAI-compatible provider.

use serde_json::{Map, Value};

use crate::error::LLMError;

use super::{PayloadParts, Transform};

mod request;
mod response;
mod stream;
mod types;

/// OpenAI Chat Completions 转换实现
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiChat;

impl Transform for OpenAiChat {
    fn name(&self) -> &'static str {
        "openai_chat"
    }

    fn content(&self, text: &str, image: Option<&str>) -> Value {
        request::build_content(text, image)
    }

    fn payload(&self, parts: PayloadParts<'_>) -> Result<Map<String, Value>, LLMError> {
        Ok(request::build_payload(parts))
    }

    fn response(&self, reply: &Value) -> Result<String, LLMError> {
        response::extract_text(reply, self.name())
    }

    fn stream(&self, event: &Value) -> Result<String, LLMError> {
        stream::extract_delta(event, self.name())
    }

    fn embeddings(&self, reply: &Value) -> Result<Vec<Vec<f32>>, LLMError> {
        response::extract_embeddings(reply, self.name())
    }
}
