//! 会话状态
//!
//! Session 独占对话记录；回合循环只拿到快照，结束后由 [`Session::finish_turn`] 一次性写回。
//! processing 为 true 期间拒绝新的提交，保证同一对话上不会有重叠回合。

use crate::core::SessionError;
use crate::react::TurnOutcome;
use crate::session::{Message, Transcript};

/// 回合开始时交给回合循环的输入
#[derive(Debug, Clone)]
pub struct TurnTicket {
    pub history: Vec<Message>,
    pub agent: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    transcript: Transcript,
    active_agent: String,
    active_model: String,
    default_agent: String,
    processing: bool,
}

impl Session {
    pub fn new(default_agent: impl Into<String>, model: impl Into<String>) -> Self {
        let default_agent = default_agent.into();
        Self {
            transcript: Transcript::new(),
            active_agent: default_agent.clone(),
            active_model: model.into(),
            default_agent,
            processing: false,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn active_agent(&self) -> &str {
        &self.active_agent
    }

    pub fn active_model(&self) -> &str {
        &self.active_model
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    /// 标记回合开始，返回快照；已有回合在跑时返回 Busy
    pub fn begin_turn(&mut self) -> Result<TurnTicket, SessionError> {
        if self.processing {
            return Err(SessionError::Busy);
        }
        self.processing = true;
        Ok(TurnTicket {
            history: self.transcript.snapshot(),
            agent: self.active_agent.clone(),
            model: self.active_model.clone(),
        })
    }

    /// 写回回合结果并解除 processing
    pub fn finish_turn(&mut self, outcome: &TurnOutcome) {
        self.transcript.extend(outcome.messages.iter().cloned());
        self.active_agent = outcome.active_agent.clone();
        self.processing = false;
    }

    /// 回合未产生结果就被放弃（如退出时）
    pub fn abort_turn(&mut self) {
        self.processing = false;
    }

    /// 清空对话并回到默认 Agent；重复调用结果相同
    pub fn clear(&mut self) {
        self.transcript.clear();
        self.active_agent = self.default_agent.clone();
    }

    pub fn set_agent(&mut self, agent: impl Into<String>) {
        self.active_agent = agent.into();
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.active_model = model.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(agent: &str, texts: &[&str]) -> TurnOutcome {
        TurnOutcome {
            messages: texts.iter().map(|t| Message::assistant(*t)).collect(),
            active_agent: agent.to_string(),
            response: texts.last().map(|t| t.to_string()),
            error: None,
        }
    }

    #[test]
    fn rejects_overlapping_turns() {
        let mut s = Session::new("Orchestrator", "m");
        let ticket = s.begin_turn().unwrap();
        assert_eq!(ticket.agent, "Orchestrator");
        assert_eq!(s.begin_turn().unwrap_err(), SessionError::Busy);

        s.finish_turn(&outcome("Coder", &["done"]));
        assert!(!s.is_processing());
        assert_eq!(s.active_agent(), "Coder");
        assert_eq!(s.messages().len(), 1);
        assert!(s.begin_turn().is_ok());
    }

    #[test]
    fn clear_twice_is_same_as_once() {
        let mut s = Session::new("Orchestrator", "m");
        s.begin_turn().unwrap();
        s.finish_turn(&outcome("Coder", &["a", "b"]));
        s.clear();
        assert_eq!(s.messages().len(), 0);
        assert_eq!(s.active_agent(), "Orchestrator");
        s.clear();
        assert_eq!(s.messages().len(), 0);
    }
}
