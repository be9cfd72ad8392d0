use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

use super::types::{AnthropicBlockDelta, AnthropicStreamEvent};

pub(crate) fn extract_delta(event: &Value, provider: &'static str) -> Result<String, LLMError> {
    let parsed = AnthropicStreamEvent::deserialize(event).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse stream event: {err}"))
    })?;
    match parsed {
        AnthropicStreamEvent::ContentBlockDelta {
            delta: AnthropicBlockDelta::TextDelta { text },
        } => Ok(text),
        AnthropicStreamEvent::Error { error } => Err(LLMError::provider(
            provider,
            format!(
                "{}: {}",
                error.kind.as_deref().unwrap_or("error"),
                error.message.as_deref().unwrap_or("unknown error")
            ),
        )),
        _ => Ok(String::new()),
    }
}

/// Anthropic never sends `[DONE]`; `message_stop` closes the stream instead.
pub(crate) fn is_message_stop(event: &Value) -> bool {
    event.get("type").and_then(Value::as_str) == Some("message_stop")
}
