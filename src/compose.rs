//! Request composition: a normalized request plus a resolved adapter becomes a ready
//! `(url, headers, body)` triple.
//!
//! Composition performs no I/O. Every failure the caller can cause (unsupported operation,
//! missing credential, malformed history) surfaces here, before a connection is opened.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::config::DEFAULT_PORT;
use crate::credentials::{EnvSource, resolve_api_key};
use crate::error::LLMError;
use crate::history;
use crate::http::{FormPart, FormValue, HttpRequest};
use crate::provider::PayloadParts;
use crate::registry::{Operation, ProviderAdapter};
use crate::types::{ChatRequest, EmbedRequest, Role, Target, TokenizeRequest, TranscribeRequest};

/// Fully composed JSON request.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl PreparedRequest {
    /// Serializes the body into a transport request.
    pub fn into_http_request(self) -> Result<HttpRequest, LLMError> {
        let body = serde_json::to_vec(&self.body).map_err(|err| LLMError::Validation {
            message: format!("failed to serialize request body: {err}"),
        })?;
        let mut request = HttpRequest::post_json(self.url, body);
        request.headers.extend(self.headers);
        Ok(request)
    }
}

/// Fully composed multipart upload.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedUpload {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub parts: Vec<FormPart>,
}

impl PreparedUpload {
    pub fn into_http_request(self) -> HttpRequest {
        let mut request = HttpRequest::post_form(self.url, self.parts);
        request.headers.extend(self.headers);
        request
    }
}

/// 组装聊天请求
///
/// Body layout is `{model?, ..payload, <max_tokens_field>, ..options}`; with `stream` set the
/// body also carries `"stream": true` and the headers ask for `text/event-stream`.
///
/// # Examples
///
/// ```
/// use kotoba_ping::compose::compose_chat;
/// use kotoba_ping::credentials::ProcessEnv;
/// use kotoba_ping::registry::Registry;
/// use kotoba_ping::types::ChatRequest;
///
/// let request = ChatRequest::new("2+2?").with_system("S");
/// let adapter = Registry::builtin().resolve(&request.target).unwrap();
/// let prepared = compose_chat(&request, &adapter, &ProcessEnv, false).unwrap();
/// assert_eq!(prepared.url, "http://localhost:8000/v1/chat/completions");
/// assert_eq!(prepared.body["max_tokens"], 1024);
/// ```
pub fn compose_chat(
    request: &ChatRequest,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
    stream: bool,
) -> Result<PreparedRequest, LLMError> {
    // 1. 地址与鉴权 均在任何网络调用之前完成
    let url = endpoint(&request.target, adapter, Operation::Chat)?;
    let mut headers = json_headers(&request.target, adapter, env)?;
    if stream {
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
    }

    // 2. 历史与内容按当前方言转换
    if request.system.is_some()
        && request
            .history
            .as_ref()
            .and_then(|history| history.first())
            .is_some_and(|first| first.role == Role::System)
    {
        return Err(LLMError::InvalidHistory {
            message: "system prompt given both on the request and as the first history entry"
                .to_string(),
        });
    }
    let transform = adapter.transform();
    let history = history::convert(request.history.as_deref(), transform)?;
    let image = request.image.as_ref().map(|image| image.to_uri());
    let content = transform.content(&request.query, image.as_deref());

    // 3. 消息体
    let mut body = Map::new();
    if let Some(model) = model(&request.target, adapter, Operation::Chat) {
        body.insert("model".to_string(), Value::String(model));
    }
    body.extend(transform.payload(PayloadParts {
        content: Some(content),
        system: request.system.as_deref(),
        prefill: request.prefill.as_deref(),
        prediction: request.prediction.as_deref(),
        history,
    })?);
    body.insert(
        adapter.max_tokens_field.clone(),
        json!(request.options.max_tokens.unwrap_or(adapter.max_tokens)),
    );
    body.extend(request.options.extra.clone());
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }

    tracing::debug!(provider = %adapter.name, %url, stream, "chat request composed");
    Ok(PreparedRequest {
        url,
        headers,
        body: Value::Object(body),
    })
}

/// 组装 embedding 请求
pub fn compose_embed(
    request: &EmbedRequest,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
) -> Result<PreparedRequest, LLMError> {
    let url = endpoint(&request.target, adapter, Operation::Embed)?;
    let headers = json_headers(&request.target, adapter, env)?;

    let mut body = Map::new();
    if let Some(model) = model(&request.target, adapter, Operation::Embed) {
        body.insert("model".to_string(), Value::String(model));
    }
    body.insert("input".to_string(), json!(request.input));
    body.extend(request.extra.clone());

    tracing::debug!(provider = %adapter.name, %url, inputs = request.input.len(), "embed request composed");
    Ok(PreparedRequest {
        url,
        headers,
        body: Value::Object(body),
    })
}

/// 组装 tokenize 请求
pub fn compose_tokenize(
    request: &TokenizeRequest,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
) -> Result<PreparedRequest, LLMError> {
    let url = endpoint(&request.target, adapter, Operation::Tokenize)?;
    let headers = json_headers(&request.target, adapter, env)?;

    tracing::debug!(provider = %adapter.name, %url, "tokenize request composed");
    Ok(PreparedRequest {
        url,
        headers,
        body: json!({ "input": request.text }),
    })
}

/// 组装语音转写请求 使用 multipart 表单
pub fn compose_transcribe(
    request: &TranscribeRequest,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
) -> Result<PreparedUpload, LLMError> {
    let url = endpoint(&request.target, adapter, Operation::Transcribe)?;
    let headers = auth_headers(&request.target, adapter, env)?;

    let mut parts = Vec::with_capacity(request.fields.len() + 2);
    if let Some(model) = model(&request.target, adapter, Operation::Transcribe) {
        parts.push(FormPart {
            name: "model".to_string(),
            value: FormValue::Text(model),
        });
    }
    parts.extend(request.fields.iter().map(|(name, value)| FormPart {
        name: name.clone(),
        value: FormValue::Text(value.clone()),
    }));
    parts.push(FormPart {
        name: "file".to_string(),
        value: FormValue::File {
            filename: request.filename.clone(),
            mime_type: request.mime_type.clone(),
            data: request.audio.clone(),
        },
    });

    tracing::debug!(provider = %adapter.name, %url, bytes = request.audio.len(), "transcribe request composed");
    Ok(PreparedUpload {
        url,
        headers,
        parts,
    })
}

/// Resolves the URL of `operation`; an explicit URL on the target bypasses composition.
fn endpoint(
    target: &Target,
    adapter: &ProviderAdapter,
    operation: Operation,
) -> Result<String, LLMError> {
    if let Some(url) = &target.url {
        return Ok(url.clone());
    }
    let path = target
        .path
        .as_deref()
        .or_else(|| adapter.path(operation))
        .ok_or_else(|| LLMError::UnsupportedOperation {
            provider: adapter.name.clone(),
            operation: operation.as_str(),
        })?;
    let port = target.port.unwrap_or(DEFAULT_PORT).to_string();
    let base = adapter.base_url.replace("{port}", &port);
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))
}

/// `Content-Type: application/json` followed by [`auth_headers`].
fn json_headers(
    target: &Target,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
) -> Result<HashMap<String, String>, LLMError> {
    let mut headers = HashMap::from([(
        "Content-Type".to_string(),
        "application/json".to_string(),
    )]);
    headers.extend(auth_headers(target, adapter, env)?);
    Ok(headers)
}

/// Auth headers plus the adapter's extra headers, which win on conflicts.
fn auth_headers(
    target: &Target,
    adapter: &ProviderAdapter,
    env: &dyn EnvSource,
) -> Result<HashMap<String, String>, LLMError> {
    let mut headers = match resolve_api_key(adapter, target.api_key.as_deref(), env)? {
        Some(key) => adapter.auth.authorize(&key),
        None => HashMap::new(),
    };
    headers.extend(
        adapter
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    Ok(headers)
}

fn model(target: &Target, adapter: &ProviderAdapter, operation: Operation) -> Option<String> {
    target
        .model
        .clone()
        .or_else(|| adapter.model(operation).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::registry::{Provider, Registry};
    use crate::types::{ImageRef, Message};

    fn resolve(target: &Target) -> ProviderAdapter {
        Registry::builtin().resolve(target).expect("adapter")
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    fn openai_env() -> HashMap<String, String> {
        HashMap::from([("OPENAI_API_KEY".to_string(), "sk-env".to_string())])
    }

    #[test]
    fn local_chat_body_matches_the_minimal_shape() {
        let request = ChatRequest::new("2+2?").with_system("S");
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect("prepared");

        assert_eq!(
            prepared.body,
            json!({
                "messages": [
                    { "role": "system", "content": "S" },
                    { "role": "user", "content": "2+2?" },
                ],
                "max_tokens": 1024,
            })
        );
        assert_eq!(prepared.url, "http://localhost:8000/v1/chat/completions");
        assert_eq!(
            prepared.headers,
            HashMap::from([("Content-Type".to_string(), "application/json".to_string())])
        );
    }

    #[test]
    fn imageless_content_is_a_plain_string_for_every_provider() {
        for provider in Provider::ALL {
            let request = ChatRequest::new("hello")
                .with_provider(provider)
                .with_api_key("k");
            let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
                .expect("prepared");
            let messages = prepared.body["messages"].as_array().expect("messages");
            let last = messages.last().expect("user message");
            assert_eq!(last["content"], json!("hello"), "{provider}");
        }
    }

    #[test]
    fn openai_uses_its_own_max_tokens_field_and_model() {
        let request = ChatRequest::new("hi")
            .with_provider(Provider::OpenAi)
            .with_max_tokens(99)
            .with_option("temperature", 0.2);
        let prepared =
            compose_chat(&request, &resolve(&request.target), &openai_env(), false)
                .expect("prepared");

        assert_eq!(prepared.body["model"], json!("gpt-4o"));
        assert_eq!(prepared.body["max_completion_tokens"], json!(99));
        assert!(prepared.body.get("max_tokens").is_none());
        assert_eq!(prepared.body["temperature"], json!(0.2));
        assert_eq!(prepared.headers["Authorization"], "Bearer sk-env");
    }

    #[test]
    fn streaming_adds_accept_header_and_flag() {
        let request = ChatRequest::new("hi");
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), true)
            .expect("prepared");
        assert_eq!(prepared.body["stream"], json!(true));
        assert_eq!(prepared.headers["Accept"], "text/event-stream");
    }

    #[test]
    fn anthropic_request_carries_version_header_and_top_level_system() {
        let request = ChatRequest::new("describe")
            .with_provider(Provider::Anthropic)
            .with_api_key("sk-ant")
            .with_system("S")
            .with_image(ImageRef::from_bytes(b"abc".to_vec(), "image/png"));
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect("prepared");

        assert_eq!(prepared.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(prepared.headers["x-api-key"], "sk-ant");
        assert_eq!(prepared.headers["anthropic-version"], "2023-06-01");
        assert_eq!(prepared.body["system"], json!("S"));
        assert_eq!(
            prepared.body["messages"][0]["content"][0]["source"],
            json!({ "type": "base64", "media_type": "image/png", "data": "YWJj" })
        );
    }

    #[test]
    fn missing_credential_fails_before_any_request_exists() {
        let request = ChatRequest::new("hi").with_provider(Provider::Xai);
        let err = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect_err("should fail");
        match err {
            LLMError::MissingCredential { env_var, .. } => assert_eq!(env_var, "XAI_API_KEY"),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn explicit_url_and_port_overrides_apply() {
        let mut request = ChatRequest::new("hi");
        request.target.port = Some(9090);
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect("prepared");
        assert_eq!(prepared.url, "http://localhost:9090/v1/chat/completions");

        request.target.url = Some("http://gpu-box:1234/chat".to_string());
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect("prepared");
        assert_eq!(prepared.url, "http://gpu-box:1234/chat");
    }

    #[test]
    fn duplicated_system_prompt_is_rejected() {
        let request = ChatRequest::new("hi")
            .with_system("S")
            .with_history(vec![Message::system("other")]);
        let err = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect_err("should fail");
        assert!(matches!(err, LLMError::InvalidHistory { .. }));
    }

    #[test]
    fn unsupported_operations_fail_before_credentials() {
        let request = EmbedRequest::new(["hi"]).with_provider(Provider::Anthropic);
        let err = compose_embed(&request, &resolve(&request.target), &no_env())
            .expect_err("should fail");
        match err {
            LLMError::UnsupportedOperation { provider, operation } => {
                assert_eq!(provider, "anthropic");
                assert_eq!(operation, "embed");
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn embed_body_lists_inputs() {
        let request = EmbedRequest::new(["a", "b"]).with_provider(Provider::OpenAi);
        let prepared =
            compose_embed(&request, &resolve(&request.target), &openai_env()).expect("prepared");
        assert_eq!(prepared.url, "https://api.openai.com/v1/embeddings");
        assert_eq!(
            prepared.body,
            json!({ "model": "text-embedding-3-small", "input": ["a", "b"] })
        );
    }

    #[test]
    fn tokenize_targets_local_extras_endpoint() {
        let request = TokenizeRequest::new("hello world");
        let prepared = compose_tokenize(&request, &resolve(&request.target), &no_env())
            .expect("prepared");
        assert_eq!(prepared.url, "http://localhost:8000/extras/tokenize");
        assert_eq!(prepared.body, json!({ "input": "hello world" }));
    }

    #[test]
    fn transcribe_builds_model_and_file_parts() {
        let mut request = TranscribeRequest::new(vec![0u8; 4], "clip.wav", "audio/wav")
            .with_provider(Provider::Groq);
        request.fields.push(("language".to_string(), "en".to_string()));
        request.target.api_key = Some("gsk".to_string());

        let upload = compose_transcribe(&request, &resolve(&request.target), &no_env())
            .expect("upload");
        assert_eq!(upload.url, "https://api.groq.com/openai/v1/audio/transcriptions");
        assert_eq!(upload.parts[0].value, FormValue::Text("whisper-large-v3".to_string()));
        assert_eq!(upload.parts[1].name, "language");
        assert!(matches!(upload.parts[2].value, FormValue::File { .. }));

        let http = upload.into_http_request();
        assert!(!http.headers.contains_key("Content-Type"));
        assert_eq!(http.headers["Authorization"], "Bearer gsk");
    }

    #[test]
    fn request_adapter_layer_overrides_headers() {
        let mut request = ChatRequest::new("hi").with_provider(Provider::Anthropic);
        request.target.api_key = Some("k".to_string());
        request.target.adapter = Some(AdapterConfig {
            headers: [("anthropic-version".to_string(), "2099-01-01".to_string())].into(),
            ..AdapterConfig::default()
        });
        let prepared = compose_chat(&request, &resolve(&request.target), &no_env(), false)
            .expect("prepared");
        assert_eq!(prepared.headers["anthropic-version"], "2099-01-01");
    }
}
