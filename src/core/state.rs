//! 状态定义：UiState 投影
//!
//! UI 只持有轻量的 UiState（阶段、历史、当前 Agent/模型、锁、提示）；会话本身由 Orchestrator 持有并投影到 UiState。

use serde::Serialize;

use crate::session::{Message, Session};

/// UI 看到的「投影」状态，轻量且易于渲染
#[derive(Clone, Debug, Serialize)]
pub struct UiState {
    pub phase: AgentPhase,
    pub history: Vec<Message>,
    pub active_agent: String,
    pub active_model: String,
    /// 正在执行的工具
    pub active_tool: Option<String>,
    pub input_locked: bool,
    /// 当前回合的流式缓冲（仅展示用，最终以对话记录为准）
    pub streaming: String,
    /// 命令反馈等临时提示
    pub notice: Option<String>,
    pub error_message: Option<String>,
    pub model_selector: bool,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
            history: Vec::new(),
            active_agent: String::new(),
            active_model: String::new(),
            active_tool: None,
            input_locked: false,
            streaming: String::new(),
            notice: None,
            error_message: None,
            model_selector: false,
        }
    }
}

impl UiState {
    /// 从会话投影（保留 phase/notice 等过程字段）
    pub fn sync_from(&mut self, session: &Session) {
        self.history = session.messages().to_vec();
        self.active_agent = session.active_agent().to_string();
        self.active_model = session.active_model().to_string();
        self.input_locked = session.is_processing();
    }

    pub fn from_session(session: &Session) -> Self {
        let mut state = Self::default();
        state.sync_from(session);
        state
    }
}

/// Agent 阶段（UI 投影用）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentPhase {
    Idle,
    Thinking,
    Streaming,
    ToolExecuting,
    HandingOff,
    Error,
}

impl AgentPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Thinking => "Thinking",
            Self::Streaming => "Streaming",
            Self::ToolExecuting => "Running tool",
            Self::HandingOff => "Handing off",
            Self::Error => "Error",
        }
    }
}
