//! Multi-turn session keeping a running transcript.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;

use crate::client::LLMClient;
use crate::config::DEFAULT_SYSTEM;
use crate::error::LLMError;
use crate::history;
use crate::registry::ProviderSelector;
use crate::stream::{BlockingTextStream, TextStream};
use crate::types::{ChatOptions, ChatRequest, ImageRef, Message, Target};

/// 会话对象 每轮结束后把问答写入历史
///
/// The system prompt is sent out-of-band with every turn and never stored in the transcript.
pub struct Chat {
    client: LLMClient,
    target: Target,
    system: Option<String>,
    options: ChatOptions,
    history: Vec<Message>,
}

impl Chat {
    /// New session against `provider` with the default system prompt.
    pub fn new(client: LLMClient, provider: impl Into<ProviderSelector>) -> Self {
        Self {
            client,
            target: Target::provider(provider),
            system: Some(DEFAULT_SYSTEM.to_string()),
            options: ChatOptions::default(),
            history: Vec::new(),
        }
    }

    /// Replaces the system prompt; `None` sends none.
    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    /// Replaces the whole target (model, URL and credential overrides included).
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Transcript so far.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Forgets the transcript.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn reply(
        &mut self,
        query: impl Into<String>,
        image: Option<ImageRef>,
    ) -> Result<String, LLMError> {
        let request = self.request(query.into(), image);
        let reply = self.client.reply(&request)?;
        self.history = history::record(&request, &reply);
        Ok(reply)
    }

    pub async fn reply_async(
        &mut self,
        query: impl Into<String>,
        image: Option<ImageRef>,
    ) -> Result<String, LLMError> {
        let request = self.request(query.into(), image);
        let reply = self.client.reply_async(&request).await?;
        self.history = history::record(&request, &reply);
        Ok(reply)
    }

    /// Streams the reply; the transcript is updated once the stream is fully consumed.
    pub fn stream(
        &mut self,
        query: impl Into<String>,
        image: Option<ImageRef>,
    ) -> Result<ChatStream<'_>, LLMError> {
        let request = self.request(query.into(), image);
        let inner = self.client.stream(&request)?;
        Ok(ChatStream {
            inner,
            turn: Turn::new(&mut self.history, request),
        })
    }

    /// Non-blocking counterpart of [`Chat::stream`].
    pub async fn stream_async(
        &mut self,
        query: impl Into<String>,
        image: Option<ImageRef>,
    ) -> Result<ChatTextStream<'_>, LLMError> {
        let request = self.request(query.into(), image);
        let inner = self.client.stream_async(&request).await?;
        Ok(ChatTextStream {
            inner,
            turn: Turn::new(&mut self.history, request),
        })
    }

    fn request(&self, query: String, image: Option<ImageRef>) -> ChatRequest {
        ChatRequest {
            query,
            image,
            system: self.system.clone(),
            prefill: None,
            prediction: None,
            history: (!self.history.is_empty()).then(|| self.history.clone()),
            options: self.options.clone(),
            target: self.target.clone(),
        }
    }
}

/// Accumulates the deltas of one streamed turn and records it on completion.
struct Turn<'a> {
    history: &'a mut Vec<Message>,
    request: ChatRequest,
    text: String,
    settled: bool,
}

impl<'a> Turn<'a> {
    fn new(history: &'a mut Vec<Message>, request: ChatRequest) -> Self {
        Self {
            history,
            request,
            text: String::new(),
            settled: false,
        }
    }

    fn observe(
        &mut self,
        item: Option<Result<String, LLMError>>,
    ) -> Option<Result<String, LLMError>> {
        match &item {
            Some(Ok(delta)) => self.text.push_str(delta),
            Some(Err(_)) => self.settled = true,
            None if !self.settled => {
                self.settled = true;
                *self.history = history::record(&self.request, &self.text);
            }
            None => {}
        }
        item
    }
}

/// 同步会话流
pub struct ChatStream<'a> {
    inner: BlockingTextStream,
    turn: Turn<'a>,
}

impl Iterator for ChatStream<'_> {
    type Item = Result<String, LLMError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next();
        self.turn.observe(item)
    }
}

/// 异步会话流
pub struct ChatTextStream<'a> {
    inner: TextStream,
    turn: Turn<'a>,
}

impl Stream for ChatTextStream<'_> {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(item) => Poll::Ready(this.turn.observe(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use futures_util::{StreamExt, stream};
    use serde_json::{Value, json};

    use super::*;
    use crate::http::{
        BlockingHttpTransport, BlockingStreamResponse, HttpRequest, HttpResponse,
        HttpStreamResponse, HttpTransport,
    };
    use crate::registry::Provider;

    /// 按顺序回放脚本化的回复
    struct ScriptedTransport {
        replies: Mutex<Vec<Vec<u8>>>,
        bodies: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                bodies: Mutex::new(Vec::new()),
            })
        }

        fn next_reply(&self, request: &HttpRequest) -> Vec<u8> {
            let body = serde_json::from_slice(request.body_bytes().expect("body")).expect("json");
            self.bodies.lock().expect("lock").push(body);
            self.replies.lock().expect("lock").pop().expect("scripted reply")
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: self.next_reply(&request),
            })
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            let body = self.next_reply(&request);
            Ok(HttpStreamResponse {
                status: 200,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(vec![Ok(body)])),
            })
        }
    }

    impl BlockingHttpTransport for ScriptedTransport {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: self.next_reply(&request),
            })
        }

        fn send_stream(&self, request: HttpRequest) -> Result<BlockingStreamResponse, LLMError> {
            let body = self.next_reply(&request);
            Ok(BlockingStreamResponse {
                status: 200,
                headers: HashMap::new(),
                body: Box::new(vec![Ok(body)].into_iter()),
            })
        }
    }

    fn chat_with(transport: Arc<ScriptedTransport>) -> Chat {
        let client = LLMClient::builder()
            .transport(transport.clone())
            .blocking_transport(transport)
            .env(Arc::new(HashMap::<String, String>::new()))
            .build()
            .expect("client");
        Chat::new(client, Provider::Local)
    }

    fn completion(text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({ "choices": [{ "message": { "content": text } }] }))
            .expect("json")
    }

    #[test]
    fn replies_accumulate_in_history() {
        let transport = ScriptedTransport::new(vec![completion("4"), completion("6")]);
        let mut chat = chat_with(transport.clone());

        assert_eq!(chat.reply("2+2?", None).expect("reply"), "4");
        assert_eq!(chat.reply("3+3?", None).expect("reply"), "6");

        assert_eq!(
            chat.history(),
            &[
                Message::user("2+2?"),
                Message::assistant("4"),
                Message::user("3+3?"),
                Message::assistant("6"),
            ]
        );

        let bodies = transport.bodies.lock().expect("lock");
        let messages = bodies[1]["messages"].as_array().expect("messages");
        assert_eq!(messages[0]["role"], json!("system"));
        assert_eq!(messages[0]["content"], json!(DEFAULT_SYSTEM));
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn async_stream_records_turn_after_exhaustion() {
        let transport = ScriptedTransport::new(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n"
                .to_vec(),
        ]);
        let mut chat = chat_with(transport).with_system(None);

        let mut stream = chat.stream_async("greet me", None).await.expect("stream");
        let mut text = String::new();
        while let Some(delta) = stream.next().await {
            text.push_str(&delta.expect("delta"));
        }
        drop(stream);

        assert_eq!(text, "Hello");
        assert_eq!(
            chat.history(),
            &[Message::user("greet me"), Message::assistant("Hello")]
        );
    }

    #[test]
    fn failed_stream_leaves_history_untouched() {
        let transport = ScriptedTransport::new(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"cut\"}}]}\n\n".to_vec(),
        ]);
        let mut chat = chat_with(transport);

        let items: Vec<_> = chat.stream("hi", None).expect("stream").collect();
        assert!(matches!(items.last(), Some(Err(LLMError::StreamTruncated { .. }))));
        assert!(chat.history().is_empty());
    }

    #[test]
    fn clear_forgets_the_transcript() {
        let transport = ScriptedTransport::new(vec![completion("hello")]);
        let mut chat = chat_with(transport);
        chat.reply("hi", None).expect("reply");
        chat.clear();
        assert!(chat.history().is_empty());
    }
}
