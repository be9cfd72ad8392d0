//! Conversation transcripts in canonical form and their replay against a provider.
//!
//! A transcript is stored as [`Message`] values so it can be sent to any provider: [`convert`]
//! renders it through the active dialect, [`compose`] appends a finished reply.

use serde::Serialize;
use serde_json::Value;

use crate::error::LLMError;
use crate::provider::Transform;
use crate::types::{ChatRequest, Content, Message, Role};

/// History entry already rendered into a provider's content shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: Value,
}

/// Renders canonical history through `transform`.
///
/// A system message is only accepted as the first entry; anywhere else the history is
/// rejected with [`LLMError::InvalidHistory`].
pub fn convert(
    history: Option<&[Message]>,
    transform: &dyn Transform,
) -> Result<Option<Vec<ProviderMessage>>, LLMError> {
    let Some(history) = history else {
        return Ok(None);
    };
    history
        .iter()
        .enumerate()
        .map(|(index, message)| {
            if message.role == Role::System && index > 0 {
                return Err(LLMError::InvalidHistory {
                    message: format!("system message at position {index}, only the first entry may be a system prompt"),
                });
            }
            let image = message.content.image_uri();
            Ok(ProviderMessage {
                role: message.role,
                content: transform.content(message.content.text(), image.as_deref()),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Appends `text` as the assistant turn of `history`.
///
/// A trailing assistant message is an unfinished (prefilled) turn, so `text` is merged onto
/// it. An empty history yields `[assistant(text)]` on purpose: no user turn is synthesized,
/// the user turn comes from [`transcript`].
///
/// # Examples
///
/// ```
/// use kotoba_ping::history::compose;
/// use kotoba_ping::types::Message;
///
/// let history = vec![Message::user("2+2?"), Message::assistant("The answer is")];
/// let history = compose(history, " 4");
/// assert_eq!(history.len(), 2);
/// assert_eq!(history[1].content.text(), "The answer is 4");
/// ```
pub fn compose(mut history: Vec<Message>, text: &str) -> Vec<Message> {
    match history.last_mut() {
        Some(last) if last.role == Role::Assistant => {
            let merged = format!("{}{text}", last.content.text());
            let image = match &last.content {
                Content::Multimodal { image, .. } => Some(image.clone()),
                Content::Text(_) => None,
            };
            last.content = Content::new(merged, image);
        }
        _ => history.push(Message::assistant(text)),
    }
    history
}

/// Canonical history a request sends: prior history, the user turn, and the prefill.
pub fn transcript(request: &ChatRequest) -> Vec<Message> {
    let mut messages = request.history.clone().unwrap_or_default();
    messages.push(Message::user(request.query_content()));
    if let Some(prefill) = &request.prefill {
        messages.push(Message::assistant(prefill.as_str()));
    }
    messages
}

/// History after `request` completed with `completion`.
///
/// `completion` is the model's own text, without the prefill; a prefilled turn ends up as a
/// single assistant message holding prefill and completion.
pub fn record(request: &ChatRequest, completion: &str) -> Vec<Message> {
    compose(transcript(request), completion)
}

/// Parses a JSON transcript (a list of `{role, content}` objects).
///
/// # Errors
///
/// Returns [`LLMError::InvalidHistory`] for unknown roles or malformed entries.
pub fn parse(value: &Value) -> Result<Vec<Message>, LLMError> {
    let entries = value.as_array().ok_or_else(|| LLMError::InvalidHistory {
        message: "history must be a list of messages".to_string(),
    })?;
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let role = entry
                .get("role")
                .and_then(Value::as_str)
                .ok_or_else(|| LLMError::InvalidHistory {
                    message: format!("entry {index} has no role"),
                })?
                .parse::<Role>()?;
            let content = entry.get("content").cloned().ok_or_else(|| {
                LLMError::InvalidHistory {
                    message: format!("entry {index} has no content"),
                }
            })?;
            let content: Content =
                serde_json::from_value(content).map_err(|err| LLMError::InvalidHistory {
                    message: format!("entry {index} has malformed content: {err}"),
                })?;
            Ok(Message { role, content })
        })
        .collect()
}
