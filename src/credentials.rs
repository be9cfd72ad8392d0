use std::collections::HashMap;

use crate::error::LLMError;
use crate::registry::ProviderAdapter;

/// 环境变量来源 便于测试时注入
pub trait EnvSource: Send + Sync {
    /// Value of `name`, `None` when unset or empty.
    fn var(&self, name: &str) -> Option<String>;
}

/// 读取当前进程环境变量
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|value| !value.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).filter(|value| !value.is_empty()).cloned()
    }
}

/// Picks the API key for `adapter`: the explicit key first, then its environment variable.
///
/// Returns `Ok(None)` for adapters without auth.
///
/// # Errors
///
/// Returns [`LLMError::MissingCredential`] when the adapter requires a key and none is found.
pub fn resolve_api_key(
    adapter: &ProviderAdapter,
    explicit: Option<&str>,
    env: &dyn EnvSource,
) -> Result<Option<String>, LLMError> {
    if !adapter.auth.requires_key() {
        return Ok(None);
    }
    if let Some(key) = explicit.filter(|key| !key.is_empty()) {
        return Ok(Some(key.to_string()));
    }
    adapter
        .api_key_env
        .as_deref()
        .and_then(|name| env.var(name))
        .map(Some)
        .ok_or_else(|| LLMError::MissingCredential {
            provider: adapter.name.clone(),
            env_var: adapter
                .api_key_env
                .clone()
                .unwrap_or_else(|| "an api_key_env entry".to_string()),
        })
}
