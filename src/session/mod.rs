//! 会话层：消息、对话记录、会话状态与斜杠命令

pub mod commands;
pub mod message;
pub mod state;
pub mod transcript;

pub use commands::{apply as apply_command, CommandOutcome, SessionCommand, HELP_TEXT};
pub use message::{Message, Role};
pub use state::{Session, TurnTicket};
pub use transcript::Transcript;
