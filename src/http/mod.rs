use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;

use crate::error::LLMError;

/// Outbound request body.
#[derive(Debug, Clone)]
pub enum HttpBody {
    /// Pre-serialized bytes, sent as-is.
    Bytes(Vec<u8>),
    /// `multipart/form-data` parts; the transport owns the boundary and content type.
    Multipart(Vec<FormPart>),
}

/// Named part of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

/// Value carried by a [`FormPart`].
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        filename: String,
        mime_type: String,
        data: Vec<u8>,
    },
}

/// Minimal POST request representation shared by both transports.
///
/// Every provider operation in this crate is a POST, so there is no method field.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<HttpBody>,
}

impl HttpRequest {
    /// JSON POST; `Content-Type` is preset so callers only add auth and extras.
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(HttpBody::Bytes(body)),
        }
    }

    /// Builds a POST request carrying a multipart form.
    pub fn post_form(url: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            body: Some(HttpBody::Multipart(parts)),
        }
    }

    /// Returns the body bytes of a JSON request, if any.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            Some(HttpBody::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }
}

/// Fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Response whose body is still being received.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Blocking counterpart of [`HttpStreamResponse`].
pub struct BlockingStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: BlockingBody,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
///
/// Dropping the stream releases the underlying connection.
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Alias for the body iterator returned by [`BlockingHttpTransport::send_stream`].
///
/// Each call to `next` performs one blocking read; dropping the iterator releases the
/// underlying connection.
pub type BlockingBody = Box<dyn Iterator<Item = Result<Vec<u8>, LLMError>> + Send>;

/// Non-blocking transport used by the `*_async` operations.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves once the whole body has been read.
    ///
    /// Non-2xx statuses are returned as responses; only network failures are errors, mapped to
    /// [`LLMError::Transport`].
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns as soon as the status line and headers arrived.
    ///
    /// # Errors
    ///
    /// Implementations should map network failures to [`LLMError::Transport`].
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Blocking transport used by `reply`, `stream` and the other synchronous operations.
///
/// The calling thread is occupied for the whole exchange, including every body read of a
/// streamed response.
pub trait BlockingHttpTransport: Send + Sync {
    /// Sends a request and waits for the full response.
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns once the status line and headers arrived.
    fn send_stream(&self, request: HttpRequest) -> Result<BlockingStreamResponse, LLMError>;
}

/// Thread-safe handle to a non-blocking transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Thread-safe handle to a blocking transport implementation.
pub type DynBlockingTransport = Arc<dyn BlockingHttpTransport>;

/// Whether `status` is 2xx; shared by plain and streamed responses.
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Drains a streaming body into a string, used to report non-2xx stream responses.
pub(crate) async fn collect_stream_text(mut body: HttpBodyStream) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Blocking counterpart of [`collect_stream_text`].
pub(crate) fn collect_blocking_text(body: BlockingBody) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    for chunk in body {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub mod reqwest;
