use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

use super::types::{AnthropicContentBlock, AnthropicMessageResponse};

/// Concatenates every text block; thinking and tool blocks are skipped.
pub(crate) fn extract_text(reply: &Value, provider: &'static str) -> Result<String, LLMError> {
    let parsed = AnthropicMessageResponse::deserialize(reply).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse messages response: {err}"))
    })?;
    let mut texts = parsed.content.into_iter().filter_map(|block| match block {
        AnthropicContentBlock::Text { text } => Some(text),
        AnthropicContentBlock::Other => None,
    });
    let first = texts
        .next()
        .ok_or_else(|| LLMError::provider(provider, "messages response has no text block"))?;
    Ok(texts.fold(first, |mut acc, text| {
        acc.push_str(&text);
        acc
    }))
}
