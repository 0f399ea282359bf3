//! 回合过程事件：供 TUI 展示流式输出、工具调用与交接

use serde::Serialize;

/// 单步过程事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 开始请求后端（第几步、当前 Agent）
    Thinking { step: usize, agent: String },
    /// 流式回复的一段（只转发非结构化输出）
    Delta { text: String },
    /// 调用工具
    ToolStarted { tool: String, args: serde_json::Value },
    /// 工具结束
    ToolFinished { tool: String, ok: bool },
    /// 交接完成
    HandedOff { from: String, to: String },
    /// 回退/重试等提示
    Notice { text: String },
}
