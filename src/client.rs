use std::sync::Arc;

use serde_json::Value;

use crate::compose::{self, PreparedRequest};
use crate::credentials::{EnvSource, ProcessEnv};
use crate::error::LLMError;
use crate::http::reqwest::{default_blocking_transport, default_dyn_transport};
use crate::http::{
    DynBlockingTransport, DynHttpTransport, HttpResponse, collect_blocking_text,
    collect_stream_text, is_success,
};
use crate::registry::{ProviderAdapter, Registry, RegistryHandle};
use crate::stream::{BlockingTextStream, SseTextStream, TextStream};
use crate::types::{ChatRequest, EmbedRequest, Target, TokenizeRequest, TranscribeRequest};

/// LLM 调用入口 负责解析 Provider 并分发请求
///
/// Cloning is cheap; clones share the registry slot and both transports.
#[derive(Clone)]
pub struct LLMClient {
    registry: Arc<RegistryHandle>,
    transport: DynHttpTransport,
    blocking: DynBlockingTransport,
    env: Arc<dyn EnvSource>,
}

impl LLMClient {
    /// 使用内置注册表与 reqwest 默认 Transport
    pub fn new() -> Result<Self, LLMError> {
        Self::builder().build()
    }

    /// 创建 Builder 便于替换 Transport 与注册表
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder::default()
    }

    /// 当前注册表快照
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.load()
    }

    /// 原子替换注册表 进行中的请求不受影响
    pub fn reload(&self, registry: Registry) {
        self.registry.swap(registry);
        tracing::debug!("registry reloaded");
    }

    /// Resolves the adapter a target selects.
    pub fn resolve(&self, target: &Target) -> Result<ProviderAdapter, LLMError> {
        self.registry.load().resolve(target)
    }

    /// 阻塞式单次回复
    pub fn reply(&self, request: &ChatRequest) -> Result<String, LLMError> {
        let (adapter, prepared) = self.prepare_chat(request, false)?;
        let response = self.blocking.send(prepared.into_http_request()?)?;
        adapter.transform().response(&decode_json(&adapter, response)?)
    }

    /// 非阻塞单次回复
    pub async fn reply_async(&self, request: &ChatRequest) -> Result<String, LLMError> {
        let (adapter, prepared) = self.prepare_chat(request, false)?;
        let response = self.transport.send(prepared.into_http_request()?).await?;
        adapter.transform().response(&decode_json(&adapter, response)?)
    }

    /// 阻塞式流式回复
    ///
    /// The prefill, if any, is the first element. Dropping the iterator closes the connection.
    pub fn stream(&self, request: &ChatRequest) -> Result<BlockingTextStream, LLMError> {
        let (adapter, prepared) = self.prepare_chat(request, true)?;
        let response = self.blocking.send_stream(prepared.into_http_request()?)?;
        tracing::debug!(provider = %adapter.name, status = response.status, "stream opened");
        if !is_success(response.status) {
            return Err(LLMError::UpstreamHttp {
                status: response.status,
                body: collect_blocking_text(response.body)?,
            });
        }
        Ok(BlockingTextStream::new(
            response.body,
            adapter.transform(),
            request.prefill.clone(),
        ))
    }

    /// 非阻塞流式回复
    ///
    /// The prefill, if any, is the first element. Dropping the stream closes the connection.
    pub async fn stream_async(&self, request: &ChatRequest) -> Result<TextStream, LLMError> {
        let (adapter, prepared) = self.prepare_chat(request, true)?;
        let response = self
            .transport
            .send_stream(prepared.into_http_request()?)
            .await?;
        tracing::debug!(provider = %adapter.name, status = response.status, "stream opened");
        if !is_success(response.status) {
            return Err(LLMError::UpstreamHttp {
                status: response.status,
                body: collect_stream_text(response.body).await?,
            });
        }
        Ok(Box::pin(SseTextStream::new(
            response.body,
            adapter.transform(),
            request.prefill.clone(),
        )))
    }

    /// 阻塞式 embedding
    pub fn embed(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let prepared = compose::compose_embed(request, &adapter, self.env.as_ref())?;
        let response = self.blocking.send(prepared.into_http_request()?)?;
        adapter.transform().embeddings(&decode_json(&adapter, response)?)
    }

    /// 非阻塞 embedding
    pub async fn embed_async(&self, request: &EmbedRequest) -> Result<Vec<Vec<f32>>, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let prepared = compose::compose_embed(request, &adapter, self.env.as_ref())?;
        let response = self.transport.send(prepared.into_http_request()?).await?;
        adapter.transform().embeddings(&decode_json(&adapter, response)?)
    }

    /// 阻塞式 tokenize
    pub fn tokenize(&self, request: &TokenizeRequest) -> Result<Vec<i64>, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let prepared = compose::compose_tokenize(request, &adapter, self.env.as_ref())?;
        let response = self.blocking.send(prepared.into_http_request()?)?;
        adapter.transform().tokens(&decode_json(&adapter, response)?)
    }

    /// 非阻塞 tokenize
    pub async fn tokenize_async(&self, request: &TokenizeRequest) -> Result<Vec<i64>, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let prepared = compose::compose_tokenize(request, &adapter, self.env.as_ref())?;
        let response = self.transport.send(prepared.into_http_request()?).await?;
        adapter.transform().tokens(&decode_json(&adapter, response)?)
    }

    /// 阻塞式语音转写
    pub fn transcribe(&self, request: &TranscribeRequest) -> Result<String, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let upload = compose::compose_transcribe(request, &adapter, self.env.as_ref())?;
        let response = self.blocking.send(upload.into_http_request())?;
        adapter.transform().transcript(&decode_json(&adapter, response)?)
    }

    /// 非阻塞语音转写
    pub async fn transcribe_async(&self, request: &TranscribeRequest) -> Result<String, LLMError> {
        let adapter = self.resolve(&request.target)?;
        let upload = compose::compose_transcribe(request, &adapter, self.env.as_ref())?;
        let response = self.transport.send(upload.into_http_request()).await?;
        adapter.transform().transcript(&decode_json(&adapter, response)?)
    }

    fn prepare_chat(
        &self,
        request: &ChatRequest,
        stream: bool,
    ) -> Result<(ProviderAdapter, PreparedRequest), LLMError> {
        let adapter = self.resolve(&request.target)?;
        let prepared = compose::compose_chat(request, &adapter, self.env.as_ref(), stream)?;
        Ok((adapter, prepared))
    }
}

/// Checks the status, then parses the body as JSON.
fn decode_json(adapter: &ProviderAdapter, response: HttpResponse) -> Result<Value, LLMError> {
    tracing::debug!(provider = %adapter.name, status = response.status, "reply received");
    if !is_success(response.status) {
        return Err(LLMError::UpstreamHttp {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    serde_json::from_slice(&response.body).map_err(|err| {
        LLMError::provider(adapter.name.clone(), format!("reply is not valid JSON: {err}"))
    })
}

/// 负责组装 LLMClient 的 Builder
#[derive(Default)]
pub struct LLMClientBuilder {
    registry: Option<Registry>,
    transport: Option<DynHttpTransport>,
    blocking: Option<DynBlockingTransport>,
    env: Option<Arc<dyn EnvSource>>,
}

impl LLMClientBuilder {
    /// 使用自定义注册表
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 替换非阻塞 Transport
    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 替换阻塞 Transport
    pub fn blocking_transport(mut self, transport: DynBlockingTransport) -> Self {
        self.blocking = Some(transport);
        self
    }

    /// 替换凭据来源（默认读取进程环境变量）
    pub fn env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = Some(env);
        self
    }

    /// 构建最终的 LLMClient
    pub fn build(self) -> Result<LLMClient, LLMError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_dyn_transport()?,
        };
        Ok(LLMClient {
            registry: Arc::new(RegistryHandle::new(self.registry.unwrap_or_default())),
            transport,
            blocking: self.blocking.unwrap_or_else(default_blocking_transport),
            env: self.env.unwrap_or_else(|| Arc::new(ProcessEnv)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::{StreamExt, stream};
    use serde_json::json;

    use super::*;
    use crate::config::RegistryConfig;
    use crate::http::{
        BlockingHttpTransport, BlockingStreamResponse, HttpRequest, HttpStreamResponse,
        HttpTransport,
    };
    use crate::registry::Provider;

    /// 记录请求并回放固定响应
    struct CannedTransport {
        status: u16,
        chunks: Vec<Vec<u8>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, chunks: &[&[u8]]) -> Arc<Self> {
            Arc::new(Self {
                status,
                chunks: chunks.iter().map(|chunk| chunk.to_vec()).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn json(status: u16, body: Value) -> Arc<Self> {
            let bytes = serde_json::to_vec(&body).expect("json");
            Self::new(status, &[bytes.as_slice()])
        }

        fn last_request(&self) -> HttpRequest {
            self.seen
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .expect("a request was sent")
        }

        fn record(&self, request: HttpRequest) -> HttpResponse {
            self.seen.lock().expect("lock").push(request);
            HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: self.chunks.concat(),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for CannedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Ok(self.record(request))
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            self.seen.lock().expect("lock").push(request);
            let chunks: Vec<Result<Vec<u8>, LLMError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(HttpStreamResponse {
                status: self.status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(chunks)),
            })
        }
    }

    impl BlockingHttpTransport for CannedTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Ok(self.record(request))
        }

        fn send_stream(&self, request: HttpRequest) -> Result<BlockingStreamResponse, LLMError> {
            self.seen.lock().expect("lock").push(request);
            let chunks: Vec<Result<Vec<u8>, LLMError>> =
                self.chunks.iter().cloned().map(Ok).collect();
            Ok(BlockingStreamResponse {
                status: self.status,
                headers: HashMap::new(),
                body: Box::new(chunks.into_iter()),
            })
        }
    }

    /// 任何网络调用都视为测试失败
    struct PanicTransport;

    #[async_trait]
    impl HttpTransport for PanicTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("transport should not be called");
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            panic!("transport should not be called");
        }
    }

    impl BlockingHttpTransport for PanicTransport {
        fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("transport should not be called");
        }

        fn send_stream(&self, _request: HttpRequest) -> Result<BlockingStreamResponse, LLMError> {
            panic!("transport should not be called");
        }
    }

    fn client_with(transport: Arc<CannedTransport>) -> LLMClient {
        let env: HashMap<String, String> =
            HashMap::from([("OPENAI_API_KEY".to_string(), "sk-test".to_string())]);
        LLMClient::builder()
            .transport(transport.clone())
            .blocking_transport(transport)
            .env(Arc::new(env))
            .build()
            .expect("client")
    }

    fn panicking_client() -> LLMClient {
        LLMClient::builder()
            .transport(Arc::new(PanicTransport))
            .blocking_transport(Arc::new(PanicTransport))
            .env(Arc::new(HashMap::<String, String>::new()))
            .build()
            .expect("client")
    }

    fn body_json(request: &HttpRequest) -> Value {
        serde_json::from_slice(request.body_bytes().expect("json body")).expect("json")
    }

    #[test]
    fn reply_posts_composed_request_and_extracts_text() {
        let transport = CannedTransport::json(
            200,
            json!({ "choices": [{ "message": { "role": "assistant", "content": "4" } }] }),
        );
        let client = client_with(transport.clone());
        let request = ChatRequest::new("2+2?").with_provider(Provider::OpenAi);

        assert_eq!(client.reply(&request).expect("reply"), "4");

        let sent = transport.last_request();
        assert_eq!(sent.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(sent.headers["Authorization"], "Bearer sk-test");
        assert_eq!(sent.headers["Content-Type"], "application/json");
        assert_eq!(body_json(&sent)["model"], json!("gpt-4o"));
    }

    #[tokio::test]
    async fn reply_async_reports_upstream_status_and_body() {
        let transport = CannedTransport::new(429, &[br#"{"error":{"message":"slow down"}}"#]);
        let client = client_with(transport);
        let err = client
            .reply_async(&ChatRequest::new("hi"))
            .await
            .expect_err("should fail");
        match &err {
            LLMError::UpstreamHttp { status, .. } => assert_eq!(*status, 429),
            other => panic!("unexpected error type: {other:?}"),
        }
        assert_eq!(err.upstream_message().as_deref(), Some("slow down"));
    }

    #[test]
    fn unparseable_success_body_is_a_provider_error() {
        let client = client_with(CannedTransport::new(200, &[b"<html>"]));
        let err = client.reply(&ChatRequest::new("hi")).expect_err("should fail");
        assert!(matches!(err, LLMError::Provider { .. }));
    }

    #[tokio::test]
    async fn stream_async_yields_prefill_then_deltas() {
        let transport = CannedTransport::new(
            200,
            &[
                b"data: {\"choices\":[{\"delta\":{\"content\":\" 4\"}}]}\n",
                b"\ndata: [DONE]\n\n",
            ],
        );
        let client = client_with(transport.clone());
        let request = ChatRequest::new("2+2?").with_prefill("The answer is");

        let deltas: Vec<String> = client
            .stream_async(&request)
            .await
            .expect("stream")
            .map(|delta| delta.expect("delta"))
            .collect()
            .await;

        assert_eq!(deltas, vec!["The answer is".to_string(), " 4".to_string()]);
        let sent = transport.last_request();
        assert_eq!(sent.headers["Accept"], "text/event-stream");
        assert_eq!(body_json(&sent)["stream"], json!(true));
    }

    #[test]
    fn blocking_stream_reports_http_errors_before_iterating() {
        let client = client_with(CannedTransport::new(500, &[b"internal"]));
        match client.stream(&ChatRequest::new("hi")) {
            Err(LLMError::UpstreamHttp { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "internal");
            }
            Err(other) => panic!("unexpected error type: {other:?}"),
            Ok(_) => panic!("stream should not open"),
        }
    }

    #[test]
    fn blocking_stream_reports_truncation() {
        let client = client_with(CannedTransport::new(
            200,
            &[b"data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n\n"],
        ));
        let items: Vec<_> = client.stream(&ChatRequest::new("hi")).expect("stream").collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(LLMError::StreamTruncated { .. })));
    }

    #[tokio::test]
    async fn lookup_and_credential_failures_happen_before_io() {
        let client = panicking_client();

        let err = client
            .reply_async(&ChatRequest::new("hi").with_provider("nowhere"))
            .await
            .expect_err("should fail");
        assert!(matches!(err, LLMError::UnknownProvider { .. }));

        let err = client
            .stream(&ChatRequest::new("hi").with_provider(Provider::Anthropic))
            .err()
            .expect("should fail");
        assert!(matches!(err, LLMError::MissingCredential { .. }));

        let err = client
            .tokenize(&TokenizeRequest {
                text: "hi".to_string(),
                target: Target::provider(Provider::Groq),
            })
            .expect_err("should fail");
        assert!(matches!(err, LLMError::UnsupportedOperation { .. }));
    }

    #[tokio::test]
    async fn embed_async_returns_vectors_in_input_order() {
        let transport = CannedTransport::json(
            200,
            json!({
                "object": "list",
                "data": [
                    { "index": 1, "embedding": [0.5, 0.5] },
                    { "index": 0, "embedding": [1.0, 0.0] },
                ]
            }),
        );
        let client = client_with(transport);
        let vectors = client
            .embed_async(&EmbedRequest::new(["a", "b"]).with_provider(Provider::OpenAi))
            .await
            .expect("embeddings");
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.5, 0.5]]);
    }

    #[test]
    fn tokenize_reads_token_ids() {
        let client = client_with(CannedTransport::json(200, json!({ "tokens": [1, 2, 3] })));
        let tokens = client
            .tokenize(&TokenizeRequest::new("hi"))
            .expect("tokens");
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[test]
    fn transcribe_uploads_multipart_form() {
        let transport = CannedTransport::json(200, json!({ "text": "hello world" }));
        let client = client_with(transport.clone());
        let request =
            TranscribeRequest::new(vec![1u8, 2, 3], "clip.mp3", "audio/mpeg").with_provider(Provider::OpenAi);

        assert_eq!(client.transcribe(&request).expect("text"), "hello world");
        let sent = transport.last_request();
        assert_eq!(sent.url, "https://api.openai.com/v1/audio/transcriptions");
        assert!(sent.body_bytes().is_none());
    }

    #[test]
    fn reload_changes_resolution_for_later_calls() {
        let transport = CannedTransport::json(
            200,
            json!({ "choices": [{ "message": { "content": "ok" } }] }),
        );
        let client = client_with(transport.clone());
        let config = RegistryConfig::from_toml_str(
            "[providers.local]\nbase_url = \"http://10.0.0.5:{port}\"\n",
        )
        .expect("config");
        client.reload(Registry::from_config(config).expect("registry"));

        client.reply(&ChatRequest::new("hi")).expect("reply");
        assert_eq!(
            transport.last_request().url,
            "http://10.0.0.5:8000/v1/chat/completions"
        );
    }
}
