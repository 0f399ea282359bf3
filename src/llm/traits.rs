//! LLM 客户端抽象
//!
//! 所有后端（OpenRouter / OpenAI 兼容 / Mock / Scripted）实现 LlmClient：
//! complete（非流式）、complete_stream（流式 Token）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream};
use thiserror::Error;

use crate::session::Message;

/// 流式 Token：每项为一段增量文本
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 后端通信错误（按可给用户的提示分类）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Insufficient credits: {0}")]
    InsufficientCredits(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 根据后端返回的错误文本归类
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("401")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("no auth credentials")
        {
            Self::Unauthorized(message)
        } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate-limit") {
            Self::RateLimited(message)
        } else if lower.contains("402") || lower.contains("insufficient") || lower.contains("credits") {
            Self::InsufficientCredits(message)
        } else if lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("network")
            || lower.contains("connection")
        {
            Self::Network(message)
        } else {
            Self::Api(message)
        }
    }
}

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 流式完成；默认退化为一次 complete 的单块流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(stream::iter(vec![Ok(content)])))
    }

    /// 当前使用的模型 id
    fn model(&self) -> &str;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_backend_errors() {
        assert!(matches!(
            LlmError::classify("HTTP 401 Unauthorized"),
            LlmError::Unauthorized(_)
        ));
        assert!(matches!(
            LlmError::classify("Rate limit exceeded, retry later"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            LlmError::classify("Insufficient credits for this request"),
            LlmError::InsufficientCredits(_)
        ));
        assert!(matches!(
            LlmError::classify("error trying to connect: dns error"),
            LlmError::Network(_)
        ));
        assert!(matches!(LlmError::classify("model overloaded"), LlmError::Api(_)));
    }
}
