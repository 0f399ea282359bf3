//! 编排器：主控循环
//!
//! 后台任务持有 Session，消费 UI 命令（Submit/Cancel/Clear/SelectModel/Quit），
//! 驱动回合循环并把 UiState 快照推给 UI。回合运行期间仍然监听命令通道，
//! 因此 Ctrl+C 与退出可以在任意挂起点打断回合。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::{AgentError, AgentPhase, AgentRuntime, UiState};
use crate::llm::ModelCatalog;
use crate::react::{TurnEvent, TurnOutcome};
use crate::session::{apply_command, Message, Role, Session, SessionCommand};

/// 从 UI 发往编排器的用户命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 用户输入（普通消息或斜杠命令）
    Submit(String),
    /// 取消当前回合
    Cancel,
    /// 清空对话
    Clear,
    /// 模型选择器结果；None 表示关闭选择器
    SelectModel(Option<String>),
    /// 退出应用
    Quit,
}

/// 编排器句柄
pub struct OrchestratorHandle {
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    pub state_rx: watch::Receiver<UiState>,
    pub task: JoinHandle<()>,
}

/// 启动编排器任务
pub fn spawn_orchestrator(runtime: Arc<AgentRuntime>, session: Session) -> OrchestratorHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(UiState::from_session(&session));
    let task = tokio::spawn(Orchestrator::new(runtime, session, state_tx).run(cmd_rx));
    OrchestratorHandle {
        cmd_tx,
        state_rx,
        task,
    }
}

struct Orchestrator {
    runtime: Arc<AgentRuntime>,
    session: Session,
    state: UiState,
    state_tx: watch::Sender<UiState>,
}

impl Orchestrator {
    fn new(runtime: Arc<AgentRuntime>, session: Session, state_tx: watch::Sender<UiState>) -> Self {
        let state = UiState::from_session(&session);
        Self {
            runtime,
            session,
            state,
            state_tx,
        }
    }

    fn publish(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }

    fn notice(&mut self, text: impl Into<String>) {
        self.state.notice = Some(text.into());
        self.publish();
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            let keep_going = match cmd {
                Command::Submit(input) => self.submit(input, &mut cmd_rx).await,
                Command::Clear => self.command(SessionCommand::Clear),
                Command::SelectModel(choice) => {
                    self.select_model(choice);
                    true
                }
                // 空闲时没有可取消的回合
                Command::Cancel => true,
                Command::Quit => false,
            };
            if !keep_going {
                break;
            }
        }
        self.runtime.shutdown().await;
        tracing::info!("orchestrator stopped");
    }

    /// 斜杠命令：只改 Session；返回是否继续运行
    fn command(&mut self, cmd: SessionCommand) -> bool {
        let cleared = cmd == SessionCommand::Clear;
        let outcome = apply_command(cmd, &mut self.session, self.runtime.catalog());
        self.state.sync_from(&self.session);
        if cleared {
            self.state.streaming.clear();
            self.state.error_message = None;
            self.state.phase = AgentPhase::Idle;
        }
        self.state.model_selector = outcome.open_model_selector;
        self.state.notice = outcome.notice;
        self.publish();
        !outcome.exit
    }

    fn select_model(&mut self, choice: Option<String>) {
        self.state.model_selector = false;
        match choice {
            Some(id) => {
                self.session.set_model(id);
                self.state.sync_from(&self.session);
                let name = ModelCatalog::display_name(self.session.active_model()).to_string();
                self.notice(format!("Model switched to {name}"));
            }
            None => self.publish(),
        }
    }

    async fn submit(&mut self, input: String, cmd_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        if let Some(cmd) = SessionCommand::parse(&input) {
            return self.command(cmd);
        }
        let input = input.trim().to_string();
        if input.is_empty() {
            return true;
        }

        let ticket = match self.session.begin_turn() {
            Ok(t) => t,
            Err(e) => {
                self.notice(e.to_string());
                return true;
            }
        };
        let cancel = self.runtime.supervisor().begin_turn();

        // 用户消息先行展示；回合结束后以 Session 为准重新投影
        self.state.history.push(Message::user(input.clone()));
        self.state.phase = AgentPhase::Thinking;
        self.state.input_locked = true;
        self.state.streaming.clear();
        self.state.notice = None;
        self.state.error_message = None;
        self.publish();

        let runtime = self.runtime.clone();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<TurnEvent>();
        let turn = runtime.run_turn(&ticket, &input, cancel, Some(&ev_tx));
        tokio::pin!(turn);

        let mut quit = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut turn => break outcome,
                Some(ev) = ev_rx.recv() => {
                    self.apply_event(ev);
                    self.publish();
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Cancel) => {
                        tracing::info!("cancel requested");
                        runtime.supervisor().cancel();
                    }
                    Some(Command::Quit) | None => {
                        quit = true;
                        runtime.supervisor().cancel();
                    }
                    Some(Command::Submit(text)) if SessionCommand::parse(&text) == Some(SessionCommand::Exit) => {
                        quit = true;
                        runtime.supervisor().cancel();
                    }
                    Some(_) => {
                        self.notice("Still processing the previous message. Press Ctrl+C to cancel it first.");
                    }
                },
            }
        };

        self.finish(outcome);
        !quit
    }

    fn apply_event(&mut self, ev: TurnEvent) {
        match ev {
            TurnEvent::Thinking { agent, .. } => {
                self.state.phase = AgentPhase::Thinking;
                self.state.active_agent = agent;
                self.state.streaming.clear();
            }
            TurnEvent::Delta { text } => {
                self.state.phase = AgentPhase::Streaming;
                self.state.streaming.push_str(&text);
            }
            TurnEvent::ToolStarted { tool, .. } => {
                self.state.phase = AgentPhase::ToolExecuting;
                self.state.active_tool = Some(tool);
            }
            TurnEvent::ToolFinished { .. } => {
                self.state.active_tool = None;
            }
            TurnEvent::HandedOff { from, to } => {
                self.state.phase = AgentPhase::HandingOff;
                self.state.notice = Some(format!("Handoff: {from} -> {to}"));
                self.state.active_agent = to;
            }
            TurnEvent::Notice { text } => {
                self.state.notice = Some(text);
            }
        }
    }

    fn finish(&mut self, outcome: TurnOutcome) {
        self.session.finish_turn(&outcome);
        self.state.sync_from(&self.session);
        self.state.streaming.clear();
        self.state.active_tool = None;

        match &outcome.error {
            None | Some(AgentError::Cancelled) => {
                self.state.phase = AgentPhase::Idle;
            }
            Some(err) => {
                // 最后一条 system 消息是给用户的说明
                let guidance = outcome
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::System)
                    .map(|m| m.content.clone())
                    .unwrap_or_else(|| err.to_string());
                self.state.phase = AgentPhase::Error;
                self.state.error_message = Some(guidance);
            }
        }
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::RuntimeBuilder;
    use crate::llm::{FixedProvider, LlmClient, LlmError, ScriptedLlmClient};
    use async_trait::async_trait;
    use std::time::Duration;

    /// 永不返回的后端
    struct HangingLlm;

    #[async_trait]
    impl LlmClient for HangingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, LlmError> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }

        fn model(&self) -> &str {
            "hang"
        }
    }

    fn runtime(dir: &tempfile::TempDir, llm: Arc<dyn LlmClient>) -> Arc<AgentRuntime> {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(dir.path().to_path_buf());
        Arc::new(
            RuntimeBuilder::new(cfg)
                .with_provider(Arc::new(FixedProvider(llm)))
                .build()
                .unwrap(),
        )
    }

    async fn wait_for(rx: &mut watch::Receiver<UiState>, pred: impl Fn(&UiState) -> bool) -> UiState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let state = rx.borrow_and_update();
                    if pred(&state) {
                        return state.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn submit_runs_turn_and_unlocks_input() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&dir, Arc::new(ScriptedLlmClient::from_texts(["Hello!"])));
        let session = rt.new_session(None);
        let mut h = spawn_orchestrator(rt, session);

        h.cmd_tx.send(Command::Submit("hi".into())).unwrap();
        let state = wait_for(&mut h.state_rx, |s| s.history.len() == 2 && !s.input_locked).await;
        assert_eq!(state.phase, AgentPhase::Idle);
        assert_eq!(state.history[1].content, "Hello!");

        h.cmd_tx.send(Command::Submit("/clear".into())).unwrap();
        let state = wait_for(&mut h.state_rx, |s| s.history.is_empty()).await;
        assert_eq!(state.notice.as_deref(), Some("Conversation cleared."));

        h.cmd_tx.send(Command::Quit).unwrap();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_interrupts_running_turn() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(&dir, Arc::new(HangingLlm));
        let session = rt.new_session(None);
        let mut h = spawn_orchestrator(rt, session);

        h.cmd_tx.send(Command::Submit("hi".into())).unwrap();
        wait_for(&mut h.state_rx, |s| s.input_locked).await;

        h.cmd_tx.send(Command::Submit("again".into())).unwrap();
        wait_for(&mut h.state_rx, |s| {
            s.notice.as_deref().is_some_and(|n| n.starts_with("Still processing"))
        })
        .await;

        h.cmd_tx.send(Command::Cancel).unwrap();
        let state = wait_for(&mut h.state_rx, |s| !s.input_locked).await;
        assert_eq!(state.phase, AgentPhase::Idle);
        let last = state.history.last().unwrap();
        assert_eq!(last.content, "Turn cancelled by user.");
        assert!(state.history.iter().all(|m| m.role != Role::Assistant));

        h.cmd_tx.send(Command::Quit).unwrap();
        h.task.await.unwrap();
    }
}
