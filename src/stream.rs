//! Streaming reply decoding: byte chunks → lines → SSE payloads → text deltas.
//!
//! The same [`DeltaDecoder`] drives both the non-blocking [`SseTextStream`] and the blocking
//! [`BlockingTextStream`], so the two paths cannot disagree on framing.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::stream;
use serde_json::Value;

use crate::error::LLMError;
use crate::http::{BlockingBody, HttpBodyStream};
use crate::provider::Transform;

const DATA_PREFIX: &[u8] = b"data: ";
const DONE_SENTINEL: &[u8] = b"[DONE]";

/// Boxed non-blocking stream of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Splits arbitrarily fragmented bytes into `\n`-terminated lines.
///
/// The terminator (and a preceding `\r`) is stripped; an unterminated tail stays buffered
/// until more bytes arrive or [`LineFramer::finish`] is called.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    // buffer[..scanned] is known to hold no `\n`
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(offset) = self.buffer[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            lines.push(strip_cr(&self.buffer[start..end]).to_vec());
            start = end + 1;
            from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    /// Flushes the buffered tail as a final line, if it is non-empty.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let buffer = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let line = strip_cr(&buffer);
        (!line.is_empty()).then(|| line.to_vec())
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Classification of one framed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    /// Payload of a `data: ` line.
    Data(&'a [u8]),
    /// The `[DONE]` sentinel.
    Done,
    /// Blank keep-alives, comments, `event:` lines and anything else.
    Ignored,
}

impl<'a> SseLine<'a> {
    pub fn parse(line: &'a [u8]) -> Self {
        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) if payload.trim_ascii() == DONE_SENTINEL => Self::Done,
            Some(payload) => Self::Data(payload),
            None => Self::Ignored,
        }
    }
}

/// Output of one decoding step: deltas in order, then the error that stopped decoding.
///
/// Deltas completed before the error are always kept, so the caller sees the same sequence
/// wherever the transport happened to split the bytes.
#[derive(Debug, Default)]
pub struct Decoded {
    pub deltas: Vec<String>,
    pub error: Option<LLMError>,
}

impl Decoded {
    /// Flattens into stream items, the error (if any) last.
    pub fn into_items(self) -> impl Iterator<Item = Result<String, LLMError>> {
        self.deltas.into_iter().map(Ok).chain(self.error.map(Err))
    }
}

/// 增量解码器 将原始字节转换为文本片段
///
/// Feed it chunks in arrival order; split points do not matter. Decoding stops at the first
/// terminal marker (`[DONE]`, or an event the transform reports as terminal) or the first error.
pub struct DeltaDecoder {
    transform: &'static dyn Transform,
    framer: LineFramer,
    done: bool,
    failed: bool,
}

impl DeltaDecoder {
    pub fn new(transform: &'static dyn Transform) -> Self {
        Self {
            transform,
            framer: LineFramer::new(),
            done: false,
            failed: false,
        }
    }

    /// Whether a terminal marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decodes one chunk into the non-empty deltas it completed.
    ///
    /// The error slot carries [`LLMError::StreamDecode`] for a payload that is not UTF-8 JSON,
    /// or whatever the transform reports for an in-band error event. Nothing is decoded after it.
    pub fn feed(&mut self, chunk: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        if self.done || self.failed {
            return decoded;
        }
        for line in self.framer.push(chunk) {
            self.decode_into(&line, &mut decoded);
            if self.done || self.failed {
                break;
            }
        }
        decoded
    }

    /// Signals end of input, decoding any unterminated tail.
    ///
    /// The error slot carries [`LLMError::StreamTruncated`] when no terminal marker was seen.
    pub fn finish(&mut self) -> Decoded {
        let mut decoded = Decoded::default();
        if self.done || self.failed {
            return decoded;
        }
        if let Some(line) = self.framer.finish() {
            self.decode_into(&line, &mut decoded);
        }
        if !self.done && !self.failed {
            tracing::debug!(provider = self.transform.name(), "stream closed before terminal marker");
            self.failed = true;
            decoded.error = Some(LLMError::StreamTruncated {
                provider: self.transform.name().to_string(),
            });
        }
        decoded
    }

    fn decode_into(&mut self, line: &[u8], decoded: &mut Decoded) {
        match self.line(line) {
            Ok(Some(delta)) => decoded.deltas.push(delta),
            Ok(None) => {}
            Err(err) => {
                self.failed = true;
                decoded.error = Some(err);
            }
        }
    }

    fn line(&mut self, line: &[u8]) -> Result<Option<String>, LLMError> {
        let payload = match SseLine::parse(line) {
            SseLine::Data(payload) => payload,
            SseLine::Done => {
                self.done = true;
                return Ok(None);
            }
            SseLine::Ignored => return Ok(None),
        };
        let provider = self.transform.name();
        let text = std::str::from_utf8(payload).map_err(|err| {
            LLMError::stream_decode(provider, format!("invalid UTF-8 in stream payload: {err}"))
        })?;
        let event: Value = serde_json::from_str(text).map_err(|err| {
            LLMError::stream_decode(provider, format!("malformed stream payload: {err}"))
        })?;
        let delta = self.transform.stream(&event)?;
        if self.transform.is_terminal(&event) {
            self.done = true;
        }
        Ok((!delta.is_empty()).then_some(delta))
    }
}

/// 异步文本流 包装 HTTP 字节流
///
/// Holds the connection until the terminal marker, an error, or drop, whichever comes first.
pub struct SseTextStream {
    body: HttpBodyStream,
    decoder: DeltaDecoder,
    pending: VecDeque<Result<String, LLMError>>,
    finished: bool,
}

impl SseTextStream {
    /// Wraps `body`; a non-empty `prefill` is yielded before any network data.
    pub fn new(
        body: HttpBodyStream,
        transform: &'static dyn Transform,
        prefill: Option<String>,
    ) -> Self {
        Self {
            body,
            decoder: DeltaDecoder::new(transform),
            pending: prefill.filter(|p| !p.is_empty()).map(Ok).into_iter().collect(),
            finished: false,
        }
    }

    fn close(&mut self) {
        self.finished = true;
        self.body = Box::pin(stream::empty());
    }
}

impl Stream for SseTextStream {
    type Item = Result<String, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.pending.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    tracing::trace!(bytes = bytes.len(), "stream chunk received");
                    let decoded = this.decoder.feed(&bytes);
                    let failed = decoded.error.is_some();
                    this.pending.extend(decoded.into_items());
                    if this.decoder.is_done() {
                        tracing::debug!("stream reached terminal marker");
                        this.close();
                    } else if failed {
                        this.close();
                    }
                }
                Poll::Ready(Some(Err(err))) => {
                    this.close();
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.pending.extend(this.decoder.finish().into_items());
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// 同步文本流 每次 `next` 可能阻塞读取
pub struct BlockingTextStream {
    body: Option<BlockingBody>,
    decoder: DeltaDecoder,
    pending: VecDeque<Result<String, LLMError>>,
}

impl BlockingTextStream {
    /// Wraps `body`; a non-empty `prefill` is yielded before any read.
    pub fn new(
        body: BlockingBody,
        transform: &'static dyn Transform,
        prefill: Option<String>,
    ) -> Self {
        Self {
            body: Some(body),
            decoder: DeltaDecoder::new(transform),
            pending: prefill.filter(|p| !p.is_empty()).map(Ok).into_iter().collect(),
        }
    }
}

impl Iterator for BlockingTextStream {
    type Item = Result<String, LLMError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let body = self.body.as_mut()?;

            match body.next() {
                Some(Ok(bytes)) => {
                    let decoded = self.decoder.feed(&bytes);
                    let failed = decoded.error.is_some();
                    self.pending.extend(decoded.into_items());
                    if self.decoder.is_done() {
                        tracing::debug!("stream reached terminal marker");
                        self.body = None;
                    } else if failed {
                        self.body = None;
                    }
                }
                Some(Err(err)) => {
                    self.body = None;
                    return Some(Err(err));
                }
                None => {
                    self.body = None;
                    self.pending.extend(self.decoder.finish().into_items());
                }
            }
        }
    }
}
