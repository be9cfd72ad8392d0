use serde::Deserialize;
use serde_json::Value;

use crate::error::LLMError;

use super::types::{OpenAiChatResponse, OpenAiEmbeddingList};

pub(crate) fn extract_text(reply: &Value, provider: &'static str) -> Result<String, LLMError> {
    let parsed = OpenAiChatResponse::deserialize(reply).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse chat response: {err}"))
    })?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LLMError::provider(provider, "chat response has no choices"))?;
    Ok(choice.message.content.unwrap_or_default())
}

pub(crate) fn extract_embeddings(
    reply: &Value,
    provider: &'static str,
) -> Result<Vec<Vec<f32>>, LLMError> {
    let parsed = OpenAiEmbeddingList::deserialize(reply).map_err(|err| {
        LLMError::provider(provider, format!("failed to parse embedding response: {err}"))
    })?;
    let mut data = parsed.data;
    // `index` is optional on some compatible servers; keep arrival order when absent
    data.sort_by_key(|item| item.index.unwrap_or(usize::MAX));
    Ok(data.into_iter().map(|item| item.embedding).collect())
}
