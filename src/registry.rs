//! Provider table and adapter resolution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{AdapterConfig, AuthScheme, RegistryConfig};
use crate::error::LLMError;
use crate::provider::{Dialect, Transform};
use crate::types::Target;

/// 内置 Provider 列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Provider {
    /// OpenAI-compatible server on this machine (llama.cpp, vLLM, ...).
    Local,
    OpenAi,
    Anthropic,
    Fireworks,
    Groq,
    Xai,
    Google,
}

impl Provider {
    pub const ALL: [Provider; 7] = [
        Self::Local,
        Self::OpenAi,
        Self::Anthropic,
        Self::Fireworks,
        Self::Groq,
        Self::Xai,
        Self::Google,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Fireworks => "fireworks",
            Self::Groq => "groq",
            Self::Xai => "xai",
            Self::Google => "google",
        }
    }

    /// Built-in record of this provider, without the global defaults.
    pub fn builtin_config(self) -> AdapterConfig {
        match self {
            Self::Local => AdapterConfig {
                base_url: Some("http://localhost:{port}".to_string()),
                chat_path: Some("v1/chat/completions".to_string()),
                embed_path: Some("v1/embeddings".to_string()),
                tokenize_path: Some("extras/tokenize".to_string()),
                auth: Some(AuthScheme::None),
                ..AdapterConfig::default()
            },
            Self::OpenAi => AdapterConfig {
                base_url: Some("https://api.openai.com/v1".to_string()),
                chat_path: Some("chat/completions".to_string()),
                embed_path: Some("embeddings".to_string()),
                transcribe_path: Some("audio/transcriptions".to_string()),
                chat_model: Some("gpt-4o".to_string()),
                embed_model: Some("text-embedding-3-small".to_string()),
                transcribe_model: Some("whisper-1".to_string()),
                max_tokens_field: Some("max_completion_tokens".to_string()),
                ..bearer("OPENAI_API_KEY")
            },
            Self::Anthropic => AdapterConfig {
                base_url: Some("https://api.anthropic.com/v1".to_string()),
                chat_path: Some("messages".to_string()),
                auth: Some(AuthScheme::Header {
                    name: "x-api-key".to_string(),
                }),
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                headers: BTreeMap::from([(
                    "anthropic-version".to_string(),
                    "2023-06-01".to_string(),
                )]),
                dialect: Some(Dialect::Anthropic),
                chat_model: Some("claude-3-5-sonnet-latest".to_string()),
                ..AdapterConfig::default()
            },
            Self::Fireworks => AdapterConfig {
                base_url: Some("https://api.fireworks.ai/inference/v1".to_string()),
                chat_path: Some("chat/completions".to_string()),
                embed_path: Some("embeddings".to_string()),
                chat_model: Some("accounts/fireworks/models/llama-v3p1-70b-instruct".to_string()),
                embed_model: Some("nomic-ai/nomic-embed-text-v1.5".to_string()),
                ..bearer("FIREWORKS_API_KEY")
            },
            Self::Groq => AdapterConfig {
                base_url: Some("https://api.groq.com/openai/v1".to_string()),
                chat_path: Some("chat/completions".to_string()),
                transcribe_path: Some("audio/transcriptions".to_string()),
                chat_model: Some("llama-3.3-70b-versatile".to_string()),
                transcribe_model: Some("whisper-large-v3".to_string()),
                ..bearer("GROQ_API_KEY")
            },
            Self::Xai => AdapterConfig {
                base_url: Some("https://api.x.ai/v1".to_string()),
                chat_path: Some("chat/completions".to_string()),
                chat_model: Some("grok-2-latest".to_string()),
                ..bearer("XAI_API_KEY")
            },
            Self::Google => AdapterConfig {
                base_url: Some(
                    "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
                ),
                chat_path: Some("chat/completions".to_string()),
                embed_path: Some("embeddings".to_string()),
                chat_model: Some("gemini-2.0-flash".to_string()),
                embed_model: Some("text-embedding-004".to_string()),
                ..bearer("GEMINI_API_KEY")
            },
        }
    }
}

fn bearer(env_var: &str) -> AdapterConfig {
    AdapterConfig {
        auth: Some(AuthScheme::Bearer),
        api_key_env: Some(env_var.to_string()),
        ..AdapterConfig::default()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = LLMError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == value)
            .ok_or_else(|| LLMError::UnknownProvider {
                provider: value.to_string(),
            })
    }
}

/// Selects the provider layer of a request: a registry entry by name, or a caller-built record.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSelector {
    Named(String),
    /// Caller-supplied record, layered over the global defaults only.
    Custom(AdapterConfig),
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::Named(Provider::Local.as_str().to_string())
    }
}

impl From<&str> for ProviderSelector {
    fn from(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

impl From<String> for ProviderSelector {
    fn from(name: String) -> Self {
        Self::Named(name)
    }
}

impl From<Provider> for ProviderSelector {
    fn from(provider: Provider) -> Self {
        Self::Named(provider.as_str().to_string())
    }
}

impl From<AdapterConfig> for ProviderSelector {
    fn from(config: AdapterConfig) -> Self {
        Self::Custom(config)
    }
}

/// Operations an adapter may expose an endpoint for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Chat,
    Embed,
    Tokenize,
    Transcribe,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Embed => "embed",
            Self::Tokenize => "tokenize",
            Self::Transcribe => "transcribe",
        }
    }
}

/// Fully resolved, immutable provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAdapter {
    /// Registry name, or `custom` for caller-built records.
    pub name: String,
    /// Base URL; may still contain `{port}`.
    pub base_url: String,
    pub chat_path: Option<String>,
    pub embed_path: Option<String>,
    pub tokenize_path: Option<String>,
    pub transcribe_path: Option<String>,
    pub auth: AuthScheme,
    pub api_key_env: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub dialect: Dialect,
    pub chat_model: Option<String>,
    pub embed_model: Option<String>,
    pub transcribe_model: Option<String>,
    pub max_tokens_field: String,
    pub max_tokens: u32,
}

impl ProviderAdapter {
    /// Builds an adapter from a merged configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] when a required field is still unset.
    pub fn from_config(name: impl Into<String>, config: AdapterConfig) -> Result<Self, LLMError> {
        let name = name.into();
        let missing = |field: &str| LLMError::InvalidConfig {
            field: format!("{name}.{field}"),
            reason: "no layer sets this field".to_string(),
        };
        Ok(Self {
            base_url: config.base_url.ok_or_else(|| missing("base_url"))?,
            dialect: config.dialect.ok_or_else(|| missing("dialect"))?,
            max_tokens_field: config
                .max_tokens_field
                .ok_or_else(|| missing("max_tokens_field"))?,
            max_tokens: config.max_tokens.ok_or_else(|| missing("max_tokens"))?,
            chat_path: config.chat_path,
            embed_path: config.embed_path,
            tokenize_path: config.tokenize_path,
            transcribe_path: config.transcribe_path,
            auth: config.auth.unwrap_or(AuthScheme::None),
            api_key_env: config.api_key_env,
            headers: config.headers,
            chat_model: config.chat_model,
            embed_model: config.embed_model,
            transcribe_model: config.transcribe_model,
            name,
        })
    }

    /// Transform set of the adapter's dialect.
    pub fn transform(&self) -> &'static dyn Transform {
        self.dialect.transform()
    }

    /// Path of `operation`, if the adapter exposes one.
    pub fn path(&self, operation: Operation) -> Option<&str> {
        match operation {
            Operation::Chat => self.chat_path.as_deref(),
            Operation::Embed => self.embed_path.as_deref(),
            Operation::Tokenize => self.tokenize_path.as_deref(),
            Operation::Transcribe => self.transcribe_path.as_deref(),
        }
    }

    /// Default model of `operation`.
    pub fn model(&self, operation: Operation) -> Option<&str> {
        match operation {
            Operation::Chat => self.chat_model.as_deref(),
            Operation::Embed => self.embed_model.as_deref(),
            Operation::Tokenize => None,
            Operation::Transcribe => self.transcribe_model.as_deref(),
        }
    }
}

/// Immutable provider table.
///
/// Resolution layers the request's override over the provider record over the global
/// defaults, explicit fields winning at each step.
#[derive(Debug, Clone)]
pub struct Registry {
    defaults: AdapterConfig,
    providers: HashMap<Provider, AdapterConfig>,
}

impl Registry {
    /// Registry holding the built-in provider table.
    pub fn builtin() -> Self {
        Self {
            defaults: AdapterConfig::defaults(),
            providers: Provider::ALL
                .into_iter()
                .map(|provider| (provider, provider.builtin_config()))
                .collect(),
        }
    }

    /// Overlays a configuration source on the built-in table.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::UnknownProvider`] for a configured name outside the built-in table.
    pub fn from_config(config: RegistryConfig) -> Result<Self, LLMError> {
        let mut registry = Self::builtin();
        if let Some(defaults) = config.defaults {
            registry.defaults = defaults.merge_over(registry.defaults);
        }
        for (name, layer) in config.providers {
            let provider = name.parse::<Provider>()?;
            let base = registry
                .providers
                .remove(&provider)
                .unwrap_or_else(|| provider.builtin_config());
            registry.providers.insert(provider, layer.merge_over(base));
        }
        tracing::debug!(
            providers = registry.providers.len(),
            "registry built from configuration"
        );
        Ok(registry)
    }

    /// Resolves the adapter a request targets.
    ///
    /// # Errors
    ///
    /// [`LLMError::UnknownProvider`] for unknown names, [`LLMError::InvalidConfig`] when the
    /// merged record lacks a required field.
    pub fn resolve(&self, target: &Target) -> Result<ProviderAdapter, LLMError> {
        let (name, layer) = match &target.provider {
            ProviderSelector::Named(name) => {
                let provider = name.parse::<Provider>()?;
                let layer = self
                    .providers
                    .get(&provider)
                    .cloned()
                    .unwrap_or_else(|| provider.builtin_config());
                (provider.as_str().to_string(), layer)
            }
            ProviderSelector::Custom(config) => ("custom".to_string(), config.clone()),
        };
        let mut merged = layer.merge_over(self.defaults.clone());
        if let Some(overrides) = &target.adapter {
            merged = overrides.clone().merge_over(merged);
        }
        let adapter = ProviderAdapter::from_config(name, merged)?;
        tracing::debug!(provider = %adapter.name, dialect = ?adapter.dialect, "adapter resolved");
        Ok(adapter)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Shared registry slot; a reload swaps in a new value atomically.
///
/// Readers keep the `Arc` they loaded, so in-flight calls finish against the registry they
/// started with.
#[derive(Debug)]
pub struct RegistryHandle {
    current: RwLock<Arc<Registry>>,
}

impl RegistryHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Current registry.
    pub fn load(&self) -> Arc<Registry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the registry, returning the previous one.
    pub fn swap(&self, registry: Registry) -> Arc<Registry> {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, Arc::new(registry))
    }
}

impl Default for RegistryHandle {
    fn default() -> Self {
        Self::new(Registry::builtin())
    }
}
