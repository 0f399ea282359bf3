//! Mock / Scripted LLM 客户端（无需 API）
//!
//! - MockLlmClient：未配置 API Key 时使用，回显最后一条 User 消息并提示如何配置
//! - ScriptedLlmClient：按预设队列依次回复，记录每次请求，用于测试回合循环

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::session::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug)]
pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            "[offline] You said: {last_user}\n\nNo API key is configured. Set OPENROUTER_API_KEY (https://openrouter.ai/keys) to talk to a real model."
        ))
    }
}

/// 预设回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 一次性完整文本（流式时作为单块）
    Text(String),
    /// 流式分块
    Chunks(Vec<String>),
    /// 先发若干块再中断
    BrokenStream { chunks: Vec<String>, error: LlmError },
    /// 请求失败
    Error(LlmError),
}

/// 脚本化客户端：complete / complete_stream 每次弹出一条回复
pub struct ScriptedLlmClient {
    model: String,
    replies: Mutex<VecDeque<ScriptedReply>>,
    /// 队列耗尽后重复使用的回复
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            model: "scripted".to_string(),
            replies: Mutex::new(replies.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 仅文本回复的便捷构造
    pub fn from_texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Text(t.into())).collect())
    }

    /// 无限重复同一回复
    pub fn repeating(text: impl Into<String>) -> Self {
        let mut client = Self::new(Vec::new());
        client.fallback = Some(text.into());
        client
    }

    /// 每次请求收到的完整消息列表
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn next(&self, messages: &[Message]) -> ScriptedReply {
        if let Ok(mut r) = self.requests.lock() {
            r.push(messages.to_vec());
        }
        let queued = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(text)) => ScriptedReply::Text(text.clone()),
            (None, None) => ScriptedReply::Error(LlmError::Api("script exhausted".to_string())),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.next(messages) {
            ScriptedReply::Text(t) => Ok(t),
            ScriptedReply::Chunks(c) => Ok(c.concat()),
            ScriptedReply::BrokenStream { error, .. } => Err(error),
            ScriptedReply::Error(e) => Err(e),
        }
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let items: Vec<Result<String, LlmError>> = match self.next(messages) {
            ScriptedReply::Text(t) => vec![Ok(t)],
            ScriptedReply::Chunks(c) => c.into_iter().map(Ok).collect(),
            ScriptedReply::BrokenStream { chunks, error } => {
                let mut items: Vec<_> = chunks.into_iter().map(Ok).collect();
                items.push(Err(error));
                items
            }
            ScriptedReply::Error(e) => return Err(e),
        };
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let out = MockLlmClient::default()
            .complete(&[Message::user("first"), Message::user("second")])
            .await
            .unwrap();
        assert!(out.contains("You said: second"));
    }

    #[tokio::test]
    async fn scripted_replies_in_order_and_records_requests() {
        let client = ScriptedLlmClient::new(vec![
            ScriptedReply::Text("one".into()),
            ScriptedReply::Chunks(vec!["t".into(), "wo".into()]),
        ]);
        assert_eq!(client.complete(&[Message::user("a")]).await.unwrap(), "one");

        let mut s = client.complete_stream(&[Message::user("b")]).await.unwrap();
        let mut got = Vec::new();
        while let Some(item) = s.next().await {
            got.push(item.unwrap());
        }
        assert_eq!(got, vec!["t", "wo"]);

        assert!(client.complete(&[]).await.is_err());
        assert_eq!(client.request_count(), 3);
        assert_eq!(client.requests()[1][0].content, "b");
    }

    #[tokio::test]
    async fn repeating_never_runs_out() {
        let client = ScriptedLlmClient::repeating("again");
        for _ in 0..5 {
            assert_eq!(client.complete(&[]).await.unwrap(), "again");
        }
    }
}
