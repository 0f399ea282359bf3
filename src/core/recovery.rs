//! 错误恢复引擎
//!
//! 决策格式错误 → RetryWithPrompt（回填给后端，回合继续）；
//! 后端通信失败与预算耗尽 → EndTurn，附带给用户的可操作说明。

use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;
use crate::react::DecodeError;

/// 将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 后端输出不符合决策格式
    pub fn handle_decode(&self, err: &DecodeError) -> RecoveryAction {
        RecoveryAction::RetryWithPrompt(err.retry_prompt())
    }

    /// 回合级错误
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        let text = match err {
            AgentError::Backend(e) => backend_guidance(e),
            AgentError::MaxHandoffsExceeded(n) => format!(
                "Stopped after {n} handoffs in one turn. Try rephrasing the request or address a specialist with /agent."
            ),
            AgentError::MaxToolCallsExceeded(n) => format!(
                "Stopped after {n} tool calls in one turn. Break the task into smaller steps."
            ),
            AgentError::MaxStepsExceeded(n) => format!(
                "Stopped after {n} reasoning steps without a final answer. Try a more specific request."
            ),
            AgentError::Cancelled => "Turn cancelled by user.".to_string(),
            AgentError::ConfigError(msg) => format!("Configuration error: {msg}"),
        };
        RecoveryAction::EndTurn(text)
    }
}

/// 后端错误 → 给用户的说明
fn backend_guidance(err: &LlmError) -> String {
    match err {
        LlmError::Unauthorized(_) => {
            "Invalid API key. Get a valid key at https://openrouter.ai/keys and set OPENROUTER_API_KEY.".to_string()
        }
        LlmError::RateLimited(_) => {
            "Rate limit reached. Wait a moment, or switch model with /model.".to_string()
        }
        LlmError::InsufficientCredits(_) => {
            "Insufficient credits. Add credits on OpenRouter or use a free model (/model google/gemini-2.0-flash-exp:free).".to_string()
        }
        LlmError::Network(msg) => format!("Network error talking to the model: {msg}. Check your connection and try again."),
        LlmError::Timeout(secs) => format!("The model did not answer within {secs}s. Try again or switch model with /model."),
        LlmError::Stream(msg) | LlmError::Api(msg) => format!("The model returned an error: {msg}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_retry() {
        let engine = RecoveryEngine::new();
        let action = engine.handle_decode(&DecodeError::Malformed("eof".into()));
        match action {
            RecoveryAction::RetryWithPrompt(msg) => assert!(msg.contains("JSON")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn backend_errors_end_turn_with_guidance() {
        let engine = RecoveryEngine::new();
        let cases = [
            (LlmError::Unauthorized("401".into()), "openrouter.ai/keys"),
            (LlmError::RateLimited("429".into()), "/model"),
            (LlmError::InsufficientCredits("402".into()), "free model"),
        ];
        for (err, needle) in cases {
            match engine.handle(&AgentError::Backend(err)) {
                RecoveryAction::EndTurn(msg) => assert!(msg.contains(needle), "{msg}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn budgets_end_turn() {
        let engine = RecoveryEngine::new();
        assert!(matches!(
            engine.handle(&AgentError::MaxHandoffsExceeded(5)),
            RecoveryAction::EndTurn(ref m) if m.contains("5 handoffs")
        ));
        assert_eq!(
            engine.handle(&AgentError::Cancelled),
            RecoveryAction::EndTurn("Turn cancelled by user.".into())
        );
    }
}
