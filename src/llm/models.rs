//! 可选模型目录（OpenRouter id）

use serde::Serialize;

/// 默认模型（免费档，便于试用）
pub const DEFAULT_MODEL: &str = "google/gemini-2.0-flash-exp:free";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub context_window: u32,
}

const MODELS: &[ModelInfo] = &[
    ModelInfo {
        id: "anthropic/claude-sonnet-4",
        name: "Claude Sonnet 4",
        description: "Latest Claude model - Best for complex reasoning",
        context_window: 200_000,
    },
    ModelInfo {
        id: "anthropic/claude-3.5-sonnet",
        name: "Claude 3.5 Sonnet",
        description: "Excellent balance of speed and intelligence",
        context_window: 200_000,
    },
    ModelInfo {
        id: "openai/gpt-4o",
        name: "GPT-4o",
        description: "OpenAI flagship model - Fast and capable",
        context_window: 128_000,
    },
    ModelInfo {
        id: "openai/gpt-4o-mini",
        name: "GPT-4o Mini",
        description: "Fast and affordable for simpler tasks",
        context_window: 128_000,
    },
    ModelInfo {
        id: DEFAULT_MODEL,
        name: "Gemini 2.0 Flash (Free)",
        description: "Free tier - Great for testing",
        context_window: 1_000_000,
    },
    ModelInfo {
        id: "google/gemini-pro-1.5",
        name: "Gemini Pro 1.5",
        description: "Long context window - 1M tokens",
        context_window: 1_000_000,
    },
    ModelInfo {
        id: "meta-llama/llama-3.3-70b-instruct",
        name: "Llama 3.3 70B",
        description: "Open source - Excellent performance",
        context_window: 131_072,
    },
    ModelInfo {
        id: "mistralai/mistral-large",
        name: "Mistral Large",
        description: "Mistral flagship - Strong reasoning",
        context_window: 128_000,
    },
    ModelInfo {
        id: "deepseek/deepseek-chat",
        name: "DeepSeek V3",
        description: "Cost-effective with strong coding abilities",
        context_window: 64_000,
    },
    ModelInfo {
        id: "qwen/qwen-2.5-72b-instruct",
        name: "Qwen 2.5 72B",
        description: "Strong multilingual and coding model",
        context_window: 131_072,
    },
];

/// 静态模型目录
pub struct ModelCatalog;

impl ModelCatalog {
    pub fn all() -> &'static [ModelInfo] {
        MODELS
    }

    pub fn get(id: &str) -> Option<&'static ModelInfo> {
        MODELS.iter().find(|m| m.id == id)
    }

    /// 显示名；目录外的 id 原样返回
    pub fn display_name(id: &str) -> &str {
        Self::get(id).map(|m| m.name).unwrap_or(id)
    }

    pub fn index_of(id: &str) -> Option<usize> {
        MODELS.iter().position(|m| m.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_model_is_listed() {
        assert!(ModelCatalog::get(DEFAULT_MODEL).is_some());
        assert_eq!(ModelCatalog::display_name("openai/gpt-4o"), "GPT-4o");
        assert_eq!(ModelCatalog::display_name("custom/model"), "custom/model");
    }
}
