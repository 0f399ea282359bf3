//! 斜杠命令
//!
//! 命令不进入回合循环，只修改 Session；结果是一条临时提示（不写入对话记录）。

use crate::agents::AgentCatalog;
use crate::llm::ModelCatalog;
use crate::session::Session;

pub const HELP_TEXT: &str = "Available commands:
  /model [id]    - Change the AI model (no id: open the selector)
  /models        - List available models
  /agent <name>  - Switch the active agent
  /agents        - List agents
  /clear         - Clear conversation history
  /help          - Show this help message
  /exit          - Exit the application
Keys: Ctrl+C cancel turn, Ctrl+L clear, Ctrl+Q quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Clear,
    Model(Option<String>),
    Models,
    Agent(Option<String>),
    Agents,
    Help,
    Exit,
    Unknown(String),
}

impl SessionCommand {
    /// 以 '/' 开头的输入解析为命令；其他输入返回 None
    pub fn parse(input: &str) -> Option<Self> {
        let rest = input.trim().strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or_default().to_lowercase();
        let arg = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Some(match name.as_str() {
            "clear" => Self::Clear,
            "model" => Self::Model(arg),
            "models" => Self::Models,
            "agent" => Self::Agent(arg),
            "agents" => Self::Agents,
            "help" => Self::Help,
            "exit" | "quit" => Self::Exit,
            _ => Self::Unknown(name),
        })
    }
}

/// 命令执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub notice: Option<String>,
    pub exit: bool,
    pub open_model_selector: bool,
}

impl CommandOutcome {
    fn notice(text: impl Into<String>) -> Self {
        Self {
            notice: Some(text.into()),
            ..Self::default()
        }
    }
}

/// 执行命令；回合进行中只接受 /exit
pub fn apply(cmd: SessionCommand, session: &mut Session, agents: &AgentCatalog) -> CommandOutcome {
    if session.is_processing() && cmd != SessionCommand::Exit {
        return CommandOutcome::notice("Still processing the previous message. Press Ctrl+C to cancel it first.");
    }

    match cmd {
        SessionCommand::Clear => {
            session.clear();
            CommandOutcome::notice("Conversation cleared.")
        }
        SessionCommand::Model(None) => CommandOutcome {
            open_model_selector: true,
            ..CommandOutcome::default()
        },
        SessionCommand::Model(Some(id)) => match resolve_model(&id) {
            Some(model) => {
                session.set_model(model);
                CommandOutcome::notice(format!("Model switched to {}", ModelCatalog::display_name(model)))
            }
            None => CommandOutcome::notice(format!("Unknown model: {id}. Use /models to list available models.")),
        },
        SessionCommand::Models => CommandOutcome::notice(list_models(session.active_model())),
        SessionCommand::Agent(None) => CommandOutcome::notice(format!(
            "Active agent: {}. Use /agent <name> to switch.",
            session.active_agent()
        )),
        SessionCommand::Agent(Some(name)) => {
            let found = agents
                .agents()
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(&name))
                .map(|a| a.name.clone());
            match found {
                Some(agent) => {
                    let text = format!("Active agent: {agent}");
                    session.set_agent(agent);
                    CommandOutcome::notice(text)
                }
                None => CommandOutcome::notice(format!(
                    "Unknown agent: {name}. Available: {}",
                    agents.names().join(", ")
                )),
            }
        }
        SessionCommand::Agents => CommandOutcome::notice(list_agents(agents, session.active_agent())),
        SessionCommand::Help => CommandOutcome::notice(HELP_TEXT),
        SessionCommand::Exit => CommandOutcome {
            exit: true,
            ..CommandOutcome::default()
        },
        SessionCommand::Unknown(name) => {
            CommandOutcome::notice(format!("Unknown command: /{name}. Type /help for available commands."))
        }
    }
}

/// 接受目录中的 id 或 1 起始序号
fn resolve_model(arg: &str) -> Option<&'static str> {
    if let Some(m) = ModelCatalog::get(arg) {
        return Some(m.id);
    }
    let idx: usize = arg.parse().ok()?;
    ModelCatalog::all().get(idx.checked_sub(1)?).map(|m| m.id)
}

pub fn list_models(active: &str) -> String {
    let mut out = String::from("Available models:");
    for (i, m) in ModelCatalog::all().iter().enumerate() {
        let marker = if m.id == active { "*" } else { " " };
        out.push_str(&format!("\n{marker} {:>2}. {} ({}) - {}", i + 1, m.name, m.id, m.description));
    }
    out
}

pub fn list_agents(agents: &AgentCatalog, active: &str) -> String {
    let mut out = String::from("Agents:");
    for a in agents.agents() {
        let marker = if a.name == active { "*" } else { " " };
        out.push_str(&format!("\n{marker} {} - {}", a.name, a.goal));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsSection;
    use crate::react::TurnOutcome;
    use crate::session::Message;
    use crate::tools::{builtin_registry, BrowserSession, ProcessRunner, UnavailableLauncher, Workspace};
    use std::sync::Arc;

    fn catalog() -> AgentCatalog {
        let dir = tempfile::tempdir().unwrap();
        let registry = builtin_registry(
            &Workspace::new(dir.path()),
            &ToolsSection::default(),
            Arc::new(ProcessRunner::new(1024)),
            Arc::new(BrowserSession::new(Arc::new(UnavailableLauncher))),
        )
        .unwrap();
        AgentCatalog::builtin(&registry).unwrap()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(SessionCommand::parse("hello"), None);
        assert_eq!(SessionCommand::parse("/CLEAR"), Some(SessionCommand::Clear));
        assert_eq!(SessionCommand::parse("/quit"), Some(SessionCommand::Exit));
        assert_eq!(
            SessionCommand::parse("/agent  Coder "),
            Some(SessionCommand::Agent(Some("Coder".into())))
        );
        assert_eq!(SessionCommand::parse("/model"), Some(SessionCommand::Model(None)));
        assert_eq!(SessionCommand::parse("/foo"), Some(SessionCommand::Unknown("foo".into())));
    }

    #[test]
    fn clear_does_not_touch_transcript_via_loop() {
        let agents = catalog();
        let mut s = Session::new("Orchestrator", "m");
        s.begin_turn().unwrap();
        s.finish_turn(&TurnOutcome {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            active_agent: "Coder".into(),
            response: Some("hello".into()),
            error: None,
        });
        let out = apply(SessionCommand::Clear, &mut s, &agents);
        assert_eq!(out.notice.as_deref(), Some("Conversation cleared."));
        assert!(s.messages().is_empty());
        assert_eq!(s.active_agent(), "Orchestrator");
    }

    #[test]
    fn switches_agent_and_model() {
        let agents = catalog();
        let mut s = Session::new("Orchestrator", "m");
        apply(SessionCommand::Agent(Some("coder".into())), &mut s, &agents);
        assert_eq!(s.active_agent(), "Coder");

        let out = apply(SessionCommand::Agent(Some("Nobody".into())), &mut s, &agents);
        assert!(out.notice.unwrap().starts_with("Unknown agent"));
        assert_eq!(s.active_agent(), "Coder");

        let first = ModelCatalog::all()[0].id;
        apply(SessionCommand::Model(Some("1".into())), &mut s, &agents);
        assert_eq!(s.active_model(), first);
        assert!(apply(SessionCommand::Model(None), &mut s, &agents).open_model_selector);
    }

    #[test]
    fn only_exit_allowed_while_processing() {
        let agents = catalog();
        let mut s = Session::new("Orchestrator", "m");
        s.begin_turn().unwrap();
        let out = apply(SessionCommand::Clear, &mut s, &agents);
        assert!(out.notice.unwrap().contains("Still processing"));
        assert!(apply(SessionCommand::Exit, &mut s, &agents).exit);
    }
}
