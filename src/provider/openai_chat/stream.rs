use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

use super::types::OpenAiStreamChunk;

/// `choices[0].delta.content`, or `""` for role-only and usage-only chunks.
pub(crate) fn extract_delta(event: &Value, provider: &'static str) -> Result<String, LLMError> {
    let chunk = OpenAiStreamChunk::deserialize(event).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse stream chunk: {err}"))
    })?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_content_delta() {
        let event = json!({
            "id": "chatcmpl-1",
            "choices": [ { "index": 0, "delta": { "content": "Hel" }, "finish_reason": null } ]
        });
        assert_eq!(extract_delta(&event, "openai_chat").expect("delta"), "Hel");
    }

    #[test]
    fn role_only_and_usage_chunks_yield_empty_text() {
        let role_only = json!({ "choices": [ { "index": 0, "delta": { "role": "assistant" } } ] });
        assert_eq!(extract_delta(&role_only, "openai_chat").expect("delta"), "");

        let usage_only = json!({ "choices": [], "usage": { "total_tokens": 12 } });
        assert_eq!(extract_delta(&usage_only, "openai_chat").expect("delta"), "");
    }
}
