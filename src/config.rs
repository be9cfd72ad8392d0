use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::LLMError;
use crate::provider::Dialect;

/// 默认补全长度
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// 本地模型服务默认端口 用于展开 `{port}`
pub const DEFAULT_PORT: u16 = 8000;

/// 会话默认的系统提示词
pub const DEFAULT_SYSTEM: &str = "You are a helpful and knowledgeable AI assistant. Answer the queries provided to the best of your ability.";

/// 鉴权方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key sent verbatim under a custom header, e.g. `x-api-key`.
    Header { name: String },
    /// Explicitly unauthenticated; lets an upper layer switch auth off.
    None,
}

impl AuthScheme {
    /// Whether this scheme needs a key at all.
    pub fn requires_key(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Produces the auth headers for `api_key`.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_ping::config::AuthScheme;
    ///
    /// let headers = AuthScheme::Bearer.authorize("sk-test");
    /// assert_eq!(headers.get("Authorization"), Some(&"Bearer sk-test".to_string()));
    /// ```
    pub fn authorize(&self, api_key: &str) -> HashMap<String, String> {
        match self {
            Self::Bearer => HashMap::from([(
                "Authorization".to_string(),
                format!("Bearer {api_key}"),
            )]),
            Self::Header { name } => HashMap::from([(name.clone(), api_key.to_string())]),
            Self::None => HashMap::new(),
        }
    }
}

/// 一层 Provider 配置 所有字段均可缺省
///
/// Layers are combined with [`AdapterConfig::merge_over`]: a field set on the upper layer
/// wins, an unset field falls through to the layer below. `headers` merge key by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Base URL; may contain a `{port}` placeholder.
    pub base_url: Option<String>,
    pub chat_path: Option<String>,
    pub embed_path: Option<String>,
    pub tokenize_path: Option<String>,
    pub transcribe_path: Option<String>,
    pub auth: Option<AuthScheme>,
    /// Environment variable consulted when no key is passed with the request.
    pub api_key_env: Option<String>,
    /// Always-sent extra headers, such as an API version.
    pub headers: BTreeMap<String, String>,
    pub dialect: Option<Dialect>,
    pub chat_model: Option<String>,
    pub embed_model: Option<String>,
    pub transcribe_model: Option<String>,
    /// Body field carrying the completion budget (`max_tokens`, `max_completion_tokens`, ...).
    pub max_tokens_field: Option<String>,
    /// Completion budget used when the request does not set one.
    pub max_tokens: Option<u32>,
}

impl AdapterConfig {
    /// The global defaults every provider is layered over.
    pub fn defaults() -> Self {
        Self {
            dialect: Some(Dialect::OpenAi),
            max_tokens_field: Some("max_tokens".to_string()),
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            ..Self::default()
        }
    }

    /// Layers `self` over `base`, explicit fields of `self` winning.
    ///
    /// # Examples
    ///
    /// ```
    /// use kotoba_ping::config::AdapterConfig;
    ///
    /// let base = AdapterConfig { chat_model: Some("a".into()), max_tokens: Some(10), ..Default::default() };
    /// let upper = AdapterConfig { chat_model: Some("b".into()), ..Default::default() };
    /// let merged = upper.merge_over(base);
    /// assert_eq!(merged.chat_model.as_deref(), Some("b"));
    /// assert_eq!(merged.max_tokens, Some(10));
    /// ```
    pub fn merge_over(self, base: AdapterConfig) -> AdapterConfig {
        let mut headers = base.headers;
        headers.extend(self.headers);
        AdapterConfig {
            base_url: self.base_url.or(base.base_url),
            chat_path: self.chat_path.or(base.chat_path),
            embed_path: self.embed_path.or(base.embed_path),
            tokenize_path: self.tokenize_path.or(base.tokenize_path),
            transcribe_path: self.transcribe_path.or(base.transcribe_path),
            auth: self.auth.or(base.auth),
            api_key_env: self.api_key_env.or(base.api_key_env),
            headers,
            dialect: self.dialect.or(base.dialect),
            chat_model: self.chat_model.or(base.chat_model),
            embed_model: self.embed_model.or(base.embed_model),
            transcribe_model: self.transcribe_model.or(base.transcribe_model),
            max_tokens_field: self.max_tokens_field.or(base.max_tokens_field),
            max_tokens: self.max_tokens.or(base.max_tokens),
        }
    }
}

/// 注册表配置源
///
/// `defaults` is layered over the built-in global defaults, and each entry of `providers`
/// over the built-in record of the provider with that name.
///
/// ```toml
/// [defaults]
/// max_tokens = 2048
///
/// [providers.local]
/// base_url = "http://127.0.0.1:{port}"
///
/// [providers.anthropic.headers]
/// anthropic-beta = "prompt-caching-2024-07-31"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub defaults: Option<AdapterConfig>,
    pub providers: BTreeMap<String, AdapterConfig>,
}

impl RegistryConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, LLMError> {
        toml::from_str(source).map_err(|err| LLMError::InvalidConfig {
            field: "registry".to_string(),
            reason: err.to_string(),
        })
    }

    /// Parses a JSON document.
    pub fn from_json_str(source: &str) -> Result<Self, LLMError> {
        serde_json::from_str(source).map_err(|err| LLMError::InvalidConfig {
            field: "registry".to_string(),
            reason: err.to_string(),
        })
    }
}
