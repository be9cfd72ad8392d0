//! 多 Provider LLM 统一调用库
//!
//! One normalized request shape ([`ChatRequest`]) is composed into each provider's HTTP wire
//! format, dispatched blocking or non-blocking, and decoded back into text or a stream of
//! text deltas.

pub mod chat;
pub mod client;
pub mod compose;
pub mod config;
pub mod credentials;
pub mod error;
pub mod history;
pub mod http;
pub mod provider;
pub mod registry;
pub mod stream;
pub mod types;

pub use chat::Chat;
pub use client::{LLMClient, LLMClientBuilder};
pub use error::LLMError;
pub use provider::{Dialect, Transform};
pub use registry::{Provider, ProviderAdapter, ProviderSelector, Registry, RegistryHandle};
pub use stream::{BlockingTextStream, TextStream};
pub use types::*;
