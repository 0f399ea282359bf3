//! OpenRouter 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://openrouter.ai/api/v1
//! - 模型 id 形如 `vendor/model`，见 models.rs

use crate::llm::OpenAiClient;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// 读取 API Key：优先 `OPENROUTER_API_KEY`，其次 `OPENAI_API_KEY`
pub fn resolve_api_key() -> Option<String> {
    ["OPENROUTER_API_KEY", "OPENAI_API_KEY"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.trim().is_empty())
}

/// 创建 OpenRouter 客户端
pub fn create_openrouter_client(base_url: Option<&str>, model: &str, api_key: &str, timeout_secs: u64) -> OpenAiClient {
    OpenAiClient::new(Some(base_url.unwrap_or(OPENROUTER_BASE_URL)), model, api_key)
        .with_request_timeout(timeout_secs)
}
