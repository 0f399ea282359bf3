//! 对话记录（只追加）
//!
//! 不做剪枝：回合内的每条消息都保留，直到用户 /clear。

use crate::session::Message;

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.messages.extend(msgs);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 回合开始时的快照（回合内对快照的修改不影响会话）
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_is_idempotent() {
        let mut t = Transcript::new();
        t.push(Message::user("a"));
        t.push(Message::assistant("b"));
        assert_eq!(t.len(), 2);
        t.clear();
        assert!(t.is_empty());
        t.clear();
        assert!(t.is_empty());
    }

    #[test]
    fn snapshot_is_detached() {
        let mut t = Transcript::new();
        t.push(Message::user("a"));
        let mut snap = t.snapshot();
        snap.push(Message::assistant("b"));
        assert_eq!(t.len(), 1);
        assert_eq!(snap.len(), 2);
    }
}
