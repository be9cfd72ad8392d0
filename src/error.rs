use thiserror::Error;

/// Aggregates every failure mode exposed by the unified client.
///
/// None of these are retried inside the crate. Each variant carries enough structured detail
/// (status and body, provider identifier, expected environment variable) for the caller to
/// decide whether to retry, fall back to another provider, or render a short diagnostic.
#[derive(Debug, Error)]
pub enum LLMError {
    /// The provider identifier is not part of the registry.
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },
    /// The adapter declares an auth scheme but no key was supplied or found.
    #[error("missing credential for {provider}: set {env_var} or pass an api key")]
    MissingCredential {
        /// Provider the credential was resolved for.
        provider: String,
        /// Environment variable that was consulted.
        env_var: String,
    },
    /// The upstream answered with a non-2xx status.
    #[error("upstream returned HTTP {status}: {body}")]
    UpstreamHttp {
        /// HTTP status code.
        status: u16,
        /// Raw response body, kept verbatim for debugging.
        body: String,
    },
    /// A history entry has a role the composer cannot place.
    #[error("invalid history: {message}")]
    InvalidHistory { message: String },
    /// A `data: ` payload could not be decoded.
    #[error("stream decode error from {provider}: {message}")]
    StreamDecode { provider: String, message: String },
    /// The connection closed before the terminal marker was observed.
    #[error("stream from {provider} closed before the terminal marker")]
    StreamTruncated { provider: String },
    /// The adapter has no endpoint for the requested operation.
    #[error("provider {provider} does not support {operation}")]
    UnsupportedOperation {
        provider: String,
        operation: &'static str,
    },
    /// Represents transport-layer or networking failures.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Signals validation failures in the request payload.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when resolving or parsing configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
    /// The provider replied successfully but in a shape the adapter does not understand,
    /// or reported an error in-band.
    #[error("provider {provider} error: {message}")]
    Provider { provider: String, message: String },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] from a textual description.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_ping::error::LLMError;
    ///
    /// let err = LLMError::transport("dns lookup failed");
    /// assert!(matches!(err, LLMError::Transport { .. }));
    /// ```
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Provider`] with the given provider name and message.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_ping::error::LLMError;
    ///
    /// let err = LLMError::provider("openai", "missing choices");
    /// assert!(matches!(err, LLMError::Provider { .. }));
    /// ```
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub(crate) fn stream_decode(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StreamDecode {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider-supplied message of an [`LLMError::UpstreamHttp`] body.
    ///
    /// OpenAI-style and Anthropic error bodies both nest it under `error.message`. Falls back
    /// to the raw body when it is not JSON or lacks that field, and to `None` for every other
    /// variant.
    pub fn upstream_message(&self) -> Option<String> {
        let Self::UpstreamHttp { body, .. } = self else {
            return None;
        };
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|value| value.pointer("/error/message"))
            .and_then(|value| value.as_str())
            .map(str::to_string);
        Some(message.unwrap_or_else(|| body.clone()))
    }
}
