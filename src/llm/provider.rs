//! 按模型 id 创建客户端
//!
//! 会话中 /model 切换模型时由 provider 重新创建客户端；配置与 API Key 只读。

use std::sync::Arc;

use crate::config::LlmSection;
use crate::llm::openrouter::{create_openrouter_client, resolve_api_key};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};

/// 模型 → 客户端
pub trait LlmProvider: Send + Sync {
    fn client_for(&self, model: &str) -> Arc<dyn LlmClient>;

    /// 是否连接真实后端
    fn is_live(&self) -> bool {
        true
    }
}

/// 由 [llm] 配置驱动的 provider
pub struct ConfiguredProvider {
    cfg: LlmSection,
    api_key: Option<String>,
}

impl ConfiguredProvider {
    pub fn new(cfg: LlmSection, api_key: Option<String>) -> Self {
        Self { cfg, api_key }
    }
}

impl LlmProvider for ConfiguredProvider {
    fn client_for(&self, model: &str) -> Arc<dyn LlmClient> {
        let provider = self.cfg.provider.to_lowercase();
        match (provider.as_str(), self.api_key.as_deref()) {
            ("mock", _) | (_, None) => Arc::new(MockLlmClient::new(model)),
            ("openai", Some(key)) => Arc::new(
                OpenAiClient::new(self.cfg.base_url.as_deref(), model, key)
                    .with_request_timeout(self.cfg.request_timeout_secs),
            ),
            (_, Some(key)) => Arc::new(create_openrouter_client(
                self.cfg.base_url.as_deref(),
                model,
                key,
                self.cfg.request_timeout_secs,
            )),
        }
    }

    fn is_live(&self) -> bool {
        self.api_key.is_some() && !self.cfg.provider.eq_ignore_ascii_case("mock")
    }
}

/// 始终返回同一客户端（测试与 headless 注入）
pub struct FixedProvider(pub Arc<dyn LlmClient>);

impl LlmProvider for FixedProvider {
    fn client_for(&self, _model: &str) -> Arc<dyn LlmClient> {
        self.0.clone()
    }
}

/// 根据配置与环境变量选择后端（OpenRouter / OpenAI 兼容 / Mock）
pub fn create_provider_from_config(cfg: &LlmSection) -> Arc<dyn LlmProvider> {
    let api_key = resolve_api_key();
    let provider = ConfiguredProvider::new(cfg.clone(), api_key);
    if provider.is_live() {
        tracing::info!(provider = %cfg.provider, model = %cfg.model, "Using live LLM backend");
    } else {
        tracing::warn!("No API key set or provider is mock, using Mock LLM");
    }
    Arc::new(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_key_falls_back_to_mock() {
        let provider = ConfiguredProvider::new(LlmSection::default(), None);
        assert!(!provider.is_live());
        assert_eq!(provider.client_for("openai/gpt-4o").model(), "openai/gpt-4o");
    }

    #[test]
    fn key_selects_live_client_for_model() {
        let provider = ConfiguredProvider::new(LlmSection::default(), Some("sk-test".into()));
        assert!(provider.is_live());
        assert_eq!(provider.client_for("deepseek/deepseek-chat").model(), "deepseek/deepseek-chat");
    }
}
