//! 会话监管：回合中断管理
//!
//! 每个回合开始时换一个新的 CancellationToken；用户 Ctrl+C 只取消当前回合，下一回合不受影响。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// 为新回合创建令牌（替换上一个）
    pub fn begin_turn(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }

    /// 当前回合的令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.current
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// 取消当前回合（用户 Ctrl+C）
    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_only_affects_current_turn() {
        let sup = SessionSupervisor::new();
        let first = sup.begin_turn();
        sup.cancel();
        assert!(first.is_cancelled());

        let second = sup.begin_turn();
        assert!(!second.is_cancelled());
        assert!(!sup.cancel_token().is_cancelled());
    }
}
