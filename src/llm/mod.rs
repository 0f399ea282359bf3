//! LLM 层：客户端抽象与实现（OpenRouter / OpenAI 兼容 / Mock / Scripted）

pub mod mock;
pub mod models;
pub mod openai;
pub mod openrouter;
pub mod provider;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient, ScriptedReply};
pub use models::{ModelCatalog, ModelInfo, DEFAULT_MODEL};
pub use openai::{OpenAiClient, TokenUsage};
pub use openrouter::{create_openrouter_client, resolve_api_key, OPENROUTER_BASE_URL};
pub use provider::{create_provider_from_config, ConfiguredProvider, FixedProvider, LlmProvider};
pub use traits::{LlmClient, LlmError, TokenStream};
