//! 错误类型与恢复动作
//!
//! 分层：
//! - [`ToolError`]：单次工具调用失败，作为数据回填到对话（不终止回合）
//! - [`RegistryError`] / [`CatalogError`]：启动期的注册与目录校验错误
//! - [`RoutingError`]：非法交接
//! - [`AgentError`]：回合级终止原因（后端失败、预算耗尽、取消）
//! - [`SessionError`]：会话并发约束
//!
//! 与 RecoveryEngine 配合：根据错误决定 RetryWithPrompt / EndTurn。

use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;

/// 工具调用失败的种类；序列化后写入 Tool 消息，供后端在下一步看到
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum ToolError {
    #[error("Invalid arguments at '{path}': {reason}")]
    #[serde(rename = "ValidationError")]
    Validation { path: String, reason: String },

    #[error("Blocked by safety policy: {reason}")]
    Blocked { reason: String },

    #[error("Execution failed: {message}")]
    ExecutionFailure { message: String },

    #[error("Tool timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Unknown tool: {name}")]
    #[serde(rename = "NotFoundError")]
    NotFound { name: String },

    #[error("Tool '{name}' is not available to agent '{agent}'")]
    #[serde(rename = "ToolNotAvailableError")]
    NotAvailable { name: String, agent: String },
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::ExecutionFailure {
            message: message.into(),
        }
    }

    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// 与序列化 tag 一致的种类名（日志 / 事件用）
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Blocked { .. } => "Blocked",
            Self::ExecutionFailure { .. } => "ExecutionFailure",
            Self::Timeout { .. } => "Timeout",
            Self::NotFound { .. } => "NotFoundError",
            Self::NotAvailable { .. } => "ToolNotAvailableError",
        }
    }
}

/// 工具注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter schema for '{tool}': {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Agent 目录校验错误（启动期）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Agent '{agent}' references unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    #[error("Agent '{agent}' hands off to unknown agent '{target}'")]
    UnknownHandoffTarget { agent: String, target: String },

    #[error("Duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("Agent catalog is empty")]
    Empty,

    #[error("Failed to load agent definitions: {0}")]
    Load(String),
}

/// 交接路由错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("Invalid handoff from '{from}' to '{to}' (allowed: {allowed})")]
    InvalidHandoff {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

/// 回合级终止原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Backend error: {0}")]
    Backend(#[from] LlmError),

    #[error("Maximum handoffs exceeded ({0})")]
    MaxHandoffsExceeded(usize),

    #[error("Maximum tool calls exceeded ({0})")]
    MaxToolCallsExceeded(usize),

    #[error("Maximum steps exceeded ({0})")]
    MaxStepsExceeded(usize),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 会话错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Still processing the previous message")]
    Busy,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将提示注入下一步，让后端重试（如决策格式错误）
    RetryWithPrompt(String),
    /// 结束本回合，并给用户一条可操作的说明
    EndTurn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_error_serializes_with_kind_tag() {
        let err = ToolError::Blocked {
            reason: "privilege escalation".into(),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["kind"], "Blocked");
        assert_eq!(v["reason"], "privilege escalation");

        let err = ToolError::validation("dirPath", "is a required property");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["kind"], "ValidationError");
        assert_eq!(err.kind(), "ValidationError");
    }

    #[test]
    fn backend_error_converts() {
        let err: AgentError = LlmError::RateLimited("429".into()).into();
        assert!(matches!(err, AgentError::Backend(LlmError::RateLimited(_))));
    }
}
