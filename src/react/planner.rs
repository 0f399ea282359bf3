//! Planner：组装请求并把后端输出解码为 Decision
//!
//! 后端输出一律视为不可信输入：纯文本即最终回复；JSON（裸对象或 ```json 代码块）按决策格式解码，
//! 不符合格式时返回 DecodeError，由回合循环回填给后端重试，不会中断回合。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::{LlmClient, LlmError, TokenStream};
use crate::session::Message;
use crate::tools::decision_schema_json;

/// 单个工具调用：{"tool": "read_file", "args": {"filePath": "..."}}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self { tool: tool.into(), args }
    }
}

/// 交接请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    pub target: String,
    pub reason: Option<String>,
}

/// 一步决策
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// 最终回复
    Respond(String),
    /// 先执行工具，再（可选）交接
    Act {
        calls: Vec<ToolCall>,
        handoff: Option<HandoffRequest>,
    },
}

/// 后端输出不符合决策格式
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed decision JSON: {0}")]
    Malformed(String),

    #[error("Empty response")]
    Empty,

    #[error("Decision JSON has no \"tool\", \"tool_calls\" or \"handoff\"")]
    NoAction,
}

impl DecodeError {
    /// 回填给后端的纠正提示
    pub fn retry_prompt(&self) -> String {
        format!(
            "Your previous output could not be processed ({self}). \
             Reply with plain text to answer the user, or with exactly one JSON object: \
             {{\"tool\": \"name\", \"args\": {{...}}}}, {{\"tool_calls\": [...]}} or {{\"handoff\": \"Agent\", \"reason\": \"...\"}}. \
             Do not mix prose with the JSON."
        )
    }
}

const DECISION_KEYS: [&str; 3] = ["tool", "tool_calls", "handoff"];

/// 是否像结构化输出（流式展示时据此抑制 JSON 片段）
pub fn looks_structured(text: &str) -> bool {
    let t = text.trim_start();
    t.starts_with('{') || t.starts_with("```")
}

/// ```json ... ``` 或 ``` {...} ``` 中的内容
fn fenced_json(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let rest = &text[start + 3..];
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let end = rest.find("```").unwrap_or(rest.len());
    let body = rest[..end].trim();
    body.starts_with('{').then_some(body)
}

/// 解码后端输出
pub fn decode(output: &str) -> Result<Decision, DecodeError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    if trimmed.starts_with('{') {
        // 允许对象后跟少量多余文字：截到最后一个 '}'
        let end = trimmed.rfind('}').map(|i| i + 1).unwrap_or(trimmed.len());
        return match serde_json::from_str::<Value>(&trimmed[..end]) {
            Ok(value) => decode_value(&value),
            // 不是 JSON 且没有任何决策键：以 '{' 开头的普通回答
            Err(_) if !mentions_decision_key(trimmed) => Ok(Decision::Respond(trimmed.to_string())),
            Err(e) => Err(DecodeError::Malformed(e.to_string())),
        };
    }

    // 代码块里的 JSON 仅在带有决策键时才视为决策；否则只是回答中的示例
    if let Some(body) = fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            if has_decision_key(&value) {
                return decode_value(&value);
            }
        }
    }

    Ok(Decision::Respond(trimmed.to_string()))
}

fn mentions_decision_key(text: &str) -> bool {
    DECISION_KEYS.iter().any(|k| text.contains(&format!("\"{k}\"")))
}

fn has_decision_key(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| DECISION_KEYS.iter().any(|k| o.contains_key(*k)))
        .unwrap_or(false)
}

fn decode_value(value: &Value) -> Result<Decision, DecodeError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("expected a JSON object".to_string()))?;

    let mut calls = Vec::new();
    if let Some(tool) = obj.get("tool") {
        calls.push(decode_call(tool, obj.get("args"))?);
    }
    if let Some(list) = obj.get("tool_calls") {
        let items = list
            .as_array()
            .ok_or_else(|| DecodeError::Malformed("\"tool_calls\" must be an array".to_string()))?;
        for (i, item) in items.iter().enumerate() {
            let call = item
                .as_object()
                .ok_or_else(|| DecodeError::Malformed(format!("tool_calls[{i}] must be an object")))?;
            let tool = call
                .get("tool")
                .ok_or_else(|| DecodeError::Malformed(format!("tool_calls[{i}] is missing \"tool\"")))?;
            calls.push(decode_call(tool, call.get("args"))?);
        }
    }

    let handoff = match obj.get("handoff") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.trim().is_empty() => Some(HandoffRequest {
            target: s.trim().to_string(),
            reason: obj
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        Some(_) => {
            return Err(DecodeError::Malformed(
                "\"handoff\" must be a non-empty agent name".to_string(),
            ))
        }
    };

    if calls.is_empty() && handoff.is_none() {
        return Err(DecodeError::NoAction);
    }
    Ok(Decision::Act { calls, handoff })
}

fn decode_call(tool: &Value, args: Option<&Value>) -> Result<ToolCall, DecodeError> {
    let name = tool
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| DecodeError::Malformed("\"tool\" must be a non-empty string".to_string()))?;
    let args = match args {
        None | Some(Value::Null) => empty_args(),
        Some(v @ Value::Object(_)) => v.clone(),
        Some(_) => {
            return Err(DecodeError::Malformed(format!(
                "\"args\" for '{name}' must be an object"
            )))
        }
    };
    Ok(ToolCall::new(name, args))
}

/// 为当前 Agent 生成 system prompt：instructions + 可见工具 schema + 决策格式
pub fn build_system_prompt(instructions: &str, tool_schemas: &str) -> String {
    format!(
        "{instructions}\n\
         ## How to respond\n\
         To answer the user, reply with plain text.\n\
         To call tools or hand off, reply with ONLY one JSON object and nothing else. Examples:\n\
         {{\"tool\": \"read_file\", \"args\": {{\"filePath\": \"src/main.rs\"}}}}\n\
         {{\"tool_calls\": [{{\"tool\": \"a\", \"args\": {{}}}}, {{\"tool\": \"b\", \"args\": {{}}}}]}}\n\
         {{\"handoff\": \"AgentName\", \"reason\": \"why\"}}\n\
         Tool results come back as messages starting with \"Tool result:\". \
         Tool calls in the same reply run before any handoff.\n\n\
         Decision schema:\n{}\n\n\
         ## Available tools\n{tool_schemas}\n",
        decision_schema_json()
    )
}

/// Planner：持有 LLM，负责把 system prompt + 对话发给后端
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    fn with_system(messages: &[Message], system: &str) -> Vec<Message> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(Message::system(system));
        full.extend(messages.iter().cloned());
        full
    }

    pub async fn plan(&self, messages: &[Message], system: &str) -> Result<String, LlmError> {
        self.llm.complete(&Self::with_system(messages, system)).await
    }

    pub async fn plan_stream(&self, messages: &[Message], system: &str) -> Result<TokenStream, LlmError> {
        self.llm.complete_stream(&Self::with_system(messages, system)).await
    }
}
