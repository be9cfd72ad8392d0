use serde_json::{Map, Value, json};

use crate::error::LLMError;
use crate::provider::PayloadParts;
use crate::types::{Role, parse_data_uri};

/// 图片在前 文本在后 与官方示例保持一致
pub(crate) fn build_content(text: &str, image: Option<&str>) -> Value {
    let Some(uri) = image else {
        return Value::String(text.to_string());
    };
    let source = match parse_data_uri(uri) {
        Some((media_type, data)) => json!({
            "type": "base64",
            "media_type": media_type,
            "data": data,
        }),
        None => json!({ "type": "url", "url": uri }),
    };
    json!([
        { "type": "image", "source": source },
        { "type": "text", "text": text },
    ])
}

/// 构建 Anthropic Messages 消息体
pub(crate) fn build_payload(parts: PayloadParts<'_>) -> Result<Map<String, Value>, LLMError> {
    let mut body = Map::new();
    let mut messages = Vec::new();

    // 1. 历史中的首条 system 提升为顶层 system
    let mut system = parts.system.map(|text| Value::String(text.to_string()));
    for (index, entry) in parts.history.unwrap_or_default().into_iter().enumerate() {
        if entry.role == Role::System {
            if index > 0 || system.is_some() {
                return Err(LLMError::InvalidHistory {
                    message: "Anthropic accepts a single system prompt ahead of all messages"
                        .to_string(),
                });
            }
            system = Some(entry.content);
            continue;
        }
        messages.push(json!({ "role": entry.role.as_str(), "content": entry.content }));
    }

    // 2. 本轮用户输入 + prefill
    if let Some(content) = parts.content {
        messages.push(json!({ "role": "user", "content": content }));
    }
    if let Some(prefill) = parts.prefill {
        messages.push(json!({ "role": "assistant", "content": prefill }));
    }
    body.insert("messages".to_string(), Value::Array(messages));

    if let Some(system) = system {
        body.insert("system".to_string(), system);
    }

    // 3. prediction 不被支持 直接忽略
    if parts.prediction.is_some() {
        tracing::debug!("anthropic messages ignores the prediction hint");
    }

    Ok(body)
}
