use std::collections::HashMap;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::LLMError;

use super::{
    BlockingBody, BlockingHttpTransport, BlockingStreamResponse, DynBlockingTransport,
    DynHttpTransport, FormPart, FormValue, HttpBody, HttpBodyStream, HttpRequest, HttpResponse,
    HttpStreamResponse, HttpTransport,
};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// 基于 reqwest 的默认异步 HttpTransport
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用自定义 reqwest::Client（超时等设置由调用方决定）
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 创建默认配置
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let mut builder = self
            .client
            .post(&request.url)
            .headers(header_map(&request.headers)?);

        match request.body {
            Some(HttpBody::Bytes(bytes)) => builder = builder.body(bytes),
            Some(HttpBody::Multipart(parts)) => {
                let mut form = reqwest::multipart::Form::new();
                for FormPart { name, value } in parts {
                    form = match value {
                        FormValue::Text(text) => form.text(name, text),
                        FormValue::File {
                            filename,
                            mime_type,
                            data,
                        } => {
                            let part = reqwest::multipart::Part::bytes(data)
                                .file_name(filename)
                                .mime_str(&mime_type)
                                .map_err(|err| {
                                    LLMError::transport(format!("invalid mime type: {err}"))
                                })?;
                            form.part(name, part)
                        }
                    };
                }
                builder = builder.multipart(form);
            }
            None => {}
        }

        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| LLMError::transport(err.to_string()))
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 基于 reqwest::blocking 的同步 Transport
///
/// The blocking client owns an internal runtime, so it is built on first use rather than at
/// construction. That keeps it safe to create an `LLMClient` inside an async context as long
/// as the blocking operations themselves are called from plain threads.
#[derive(Default)]
pub struct ReqwestBlockingTransport {
    client: OnceLock<reqwest::blocking::Client>,
}

impl ReqwestBlockingTransport {
    /// 使用自定义 reqwest::blocking::Client
    pub fn new(client: reqwest::blocking::Client) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(client);
        Self { client: cell }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, LLMError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let built = reqwest::blocking::Client::builder().build().map_err(|err| {
            LLMError::transport(format!("failed to create blocking reqwest client: {err}"))
        })?;
        Ok(self.client.get_or_init(|| built))
    }

    fn build_request(
        &self,
        request: HttpRequest,
    ) -> Result<reqwest::blocking::RequestBuilder, LLMError> {
        let mut builder = self
            .client()?
            .post(&request.url)
            .headers(header_map(&request.headers)?);

        match request.body {
            Some(HttpBody::Bytes(bytes)) => builder = builder.body(bytes),
            Some(HttpBody::Multipart(parts)) => {
                let mut form = reqwest::blocking::multipart::Form::new();
                for FormPart { name, value } in parts {
                    form = match value {
                        FormValue::Text(text) => form.text(name, text),
                        FormValue::File {
                            filename,
                            mime_type,
                            data,
                        } => {
                            let part = reqwest::blocking::multipart::Part::bytes(data)
                                .file_name(filename)
                                .mime_str(&mime_type)
                                .map_err(|err| {
                                    LLMError::transport(format!("invalid mime type: {err}"))
                                })?;
                            form.part(name, part)
                        }
                    };
                }
                builder = builder.multipart(form);
            }
            None => {}
        }

        Ok(builder)
    }
}

impl BlockingHttpTransport for ReqwestBlockingTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .map_err(|err| LLMError::transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let body = response
            .bytes()
            .map_err(|err| LLMError::transport(err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn send_stream(&self, request: HttpRequest) -> Result<BlockingStreamResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .map_err(|err| LLMError::transport(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = headers_to_map(response.headers());
        let body: BlockingBody = Box::new(ReadChunks {
            reader: response,
            finished: false,
        });

        Ok(BlockingStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Adapts any [`Read`] into the chunk iterator expected by [`BlockingBody`].
struct ReadChunks<R> {
    reader: R,
    finished: bool,
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<Vec<u8>, LLMError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut buf = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    self.finished = true;
                    return None;
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Some(Ok(buf));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(LLMError::transport(err.to_string())));
                }
            }
        }
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, LLMError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LLMError::transport(format!("invalid header name: {err}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|err| {
            LLMError::transport(format!("invalid header value for {header_name}: {err}"))
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

/// 便捷构造线程安全的异步 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}

/// 便捷构造线程安全的同步 Transport
pub fn default_blocking_transport() -> DynBlockingTransport {
    Arc::new(ReqwestBlockingTransport::default())
}
