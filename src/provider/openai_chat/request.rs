use serde_json::{Map, Value, json};

use crate::provider::PayloadParts;
use crate::types::Role;

pub(crate) fn build_content(text: &str, image: Option<&str>) -> Value {
    match image {
        None => Value::String(text.to_string()),
        Some(url) => json!([
            { "type": "text", "text": text },
            { "type": "image_url", "image_url": { "url": url } },
        ]),
    }
}

/// 构建 OpenAI Chat 消息体
pub(crate) fn build_payload(parts: PayloadParts<'_>) -> Map<String, Value> {
    let mut messages = Vec::new();

    // 1. system 放在最前
    if let Some(system) = parts.system {
        messages.push(message(Role::System, Value::String(system.to_string())));
    }

    // 2. 历史消息 + 本轮用户输入 + prefill
    for entry in parts.history.unwrap_or_default() {
        messages.push(message(entry.role, entry.content));
    }
    if let Some(content) = parts.content {
        messages.push(message(Role::User, content));
    }
    if let Some(prefill) = parts.prefill {
        messages.push(message(Role::Assistant, Value::String(prefill.to_string())));
    }

    let mut body = Map::new();
    body.insert("messages".to_string(), Value::Array(messages));

    // 3. predicted outputs
    if let Some(prediction) = parts.prediction {
        body.insert(
            "prediction".to_string(),
            json!({ "type": "content", "content": prediction }),
        );
    }
    body
}

fn message(role: Role, content: Value) -> Value {
    json!({ "role": role.as_str(), "content": content })
}
