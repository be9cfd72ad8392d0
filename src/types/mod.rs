//! Provider-agnostic request and transcript types.
//!
//! Callers describe a request once through [`ChatRequest`] (or the embedding, tokenization
//! and transcription requests) and the composer turns it into a provider payload.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::AdapterConfig;
use crate::error::LLMError;
use crate::registry::ProviderSelector;

mod content;

pub use content::{Content, ImageRef, parse_data_uri};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(LLMError::InvalidHistory {
                message: format!("unknown role `{other}`"),
            }),
        }
    }
}

/// One entry of a conversation transcript, stored in canonical form so it can be replayed
/// against any provider.
///
/// # Examples
///
/// ```
/// use kotoba_ping::types::{Message, Role};
///
/// let msg = Message::user("Describe this image");
/// assert_eq!(msg.role, Role::User);
/// assert_eq!(msg.content.text(), "Describe this image");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Content,
}

impl Message {
    pub fn new(role: Role, content: impl Into<Content>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<Content>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<Content>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<Content>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Where a request goes: provider selection plus per-request overrides.
///
/// Every override is optional and wins over whatever the resolved adapter declares.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub provider: ProviderSelector,
    /// Model identifier; falls back to the adapter's default for the operation.
    pub model: Option<String>,
    /// Full URL, bypassing base URL and path composition.
    pub url: Option<String>,
    /// Path appended to the adapter's base URL instead of the operation path.
    pub path: Option<String>,
    /// API key; takes precedence over the adapter's environment variable.
    pub api_key: Option<String>,
    /// Value substituted for `{port}` in URL templates.
    pub port: Option<u16>,
    /// Highest-priority adapter layer merged over the selected provider.
    pub adapter: Option<AdapterConfig>,
}

impl Target {
    pub fn provider(provider: impl Into<ProviderSelector>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }
}

/// Generation options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Completion budget, written under the adapter's max-tokens field name.
    pub max_tokens: Option<u32>,
    /// Provider-specific passthrough fields, merged last into the body.
    pub extra: Map<String, Value>,
}

/// Normalized chat request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub query: String,
    pub image: Option<ImageRef>,
    pub system: Option<String>,
    /// Assistant-authored text the model continues from.
    pub prefill: Option<String>,
    /// Speculative-decoding content for providers that accept it.
    pub prediction: Option<String>,
    pub history: Option<Vec<Message>>,
    pub options: ChatOptions,
    pub target: Target,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            image: None,
            system: None,
            prefill: None,
            prediction: None,
            history: None,
            options: ChatOptions::default(),
            target: Target::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderSelector>) -> Self {
        self.target.provider = provider.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.target.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.target.api_key = Some(api_key.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<ImageRef>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_prefill(mut self, prefill: impl Into<String>) -> Self {
        self.prefill = Some(prefill.into());
        self
    }

    pub fn with_prediction(mut self, prediction: impl Into<String>) -> Self {
        self.prediction = Some(prediction.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    /// Adds a passthrough body field such as `temperature`.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.extra.insert(key.into(), value.into());
        self
    }

    /// The user turn this request adds, in canonical form.
    pub fn query_content(&self) -> Content {
        Content::new(self.query.clone(), self.image.clone())
    }
}

/// Embedding request.
#[derive(Debug, Clone, Default)]
pub struct EmbedRequest {
    pub input: Vec<String>,
    pub extra: Map<String, Value>,
    pub target: Target,
}

impl EmbedRequest {
    pub fn new<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderSelector>) -> Self {
        self.target.provider = provider.into();
        self
    }
}

/// Tokenization request, served by local model servers.
#[derive(Debug, Clone, Default)]
pub struct TokenizeRequest {
    pub text: String,
    pub target: Target,
}

impl TokenizeRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Audio transcription request.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
    /// Additional text form fields such as `language` or `prompt`.
    pub fields: Vec<(String, String)>,
    pub target: Target,
}

impl TranscribeRequest {
    pub fn new(
        audio: impl Into<Vec<u8>>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            audio: audio.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            fields: Vec::new(),
            target: Target::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderSelector>) -> Self {
        self.target.provider = provider.into();
        self
    }
}
