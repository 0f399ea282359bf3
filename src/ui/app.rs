//! TUI 应用主循环
//!
//! 进入全屏/原始模式，轮询 state_rx 与键盘事件，将用户输入与快捷键转为 Command 发送给编排器，
//! 每帧用 draw 渲染 UiState 与输入缓冲。编排器任务结束（/exit、Ctrl+Q）后退出。

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::KeyCode;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::core::{Command, OrchestratorHandle, UiState};
use crate::llm::ModelCatalog;
use crate::ui::event::{AppEvent, EventHandler};
use crate::ui::render::draw;

/// 运行 TUI：启用原始模式与全屏，循环 poll 事件 + 渲染，退出时恢复终端
pub async fn run_app(handle: OrchestratorHandle) -> anyhow::Result<()> {
    let OrchestratorHandle {
        cmd_tx,
        state_rx,
        task,
    } = handle;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let result = event_loop(&mut terminal, &cmd_tx, &state_rx, &task).await;

    restore_terminal(&mut terminal)?;
    // 编排器在退出前释放浏览器等资源
    let _ = cmd_tx.send(Command::Quit);
    let _ = task.await;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    cmd_tx: &tokio::sync::mpsc::UnboundedSender<Command>,
    state_rx: &tokio::sync::watch::Receiver<UiState>,
    task: &tokio::task::JoinHandle<()>,
) -> anyhow::Result<()> {
    let events = EventHandler::new(cmd_tx.clone());
    let mut input_buffer = String::new();
    let mut conversation_scroll = usize::MAX;
    let mut last_history_len = 0usize;
    let mut last_stream_len = 0usize;
    let mut selector: Option<usize> = None;
    let mut selector_seen = false;

    loop {
        if task.is_finished() {
            break;
        }
        let state = state_rx.borrow().clone();

        // 有新内容时跟随到底部
        if state.history.len() != last_history_len || state.streaming.len() != last_stream_len {
            last_history_len = state.history.len();
            last_stream_len = state.streaming.len();
            conversation_scroll = usize::MAX;
        }
        // /model 打开选择器（只在状态翻转时打开一次）
        if state.model_selector && !selector_seen {
            selector = Some(ModelCatalog::index_of(&state.active_model).unwrap_or(0));
        }
        selector_seen = state.model_selector;

        if let Some(ev) = events.poll(Duration::from_millis(50))? {
            match ev {
                AppEvent::Command(Command::Quit) => break,
                AppEvent::Command(_) => {}
                AppEvent::Key(key) if selector.is_some() => {
                    let models = ModelCatalog::all();
                    let idx = selector.unwrap_or(0);
                    match key.code {
                        KeyCode::Up => selector = Some(idx.saturating_sub(1)),
                        KeyCode::Down => selector = Some((idx + 1).min(models.len().saturating_sub(1))),
                        KeyCode::Enter => {
                            let chosen = models.get(idx).map(|m| m.id.to_string());
                            events.send(Command::SelectModel(chosen));
                            selector = None;
                        }
                        KeyCode::Esc => {
                            events.send(Command::SelectModel(None));
                            selector = None;
                        }
                        _ => {}
                    }
                }
                AppEvent::Key(key) => match key.code {
                    KeyCode::Enter => {
                        let input = input_buffer.trim().to_string();
                        // 回合进行中也发送：编排器只接受 /exit，其余给出提示
                        if !input.is_empty() {
                            input_buffer.clear();
                            events.send_submit(input);
                        }
                    }
                    KeyCode::Backspace => {
                        input_buffer.pop();
                    }
                    KeyCode::Char(c) => input_buffer.push(c),
                    KeyCode::Up => conversation_scroll = conversation_scroll.saturating_sub(1),
                    KeyCode::Down => conversation_scroll = conversation_scroll.saturating_add(1),
                    KeyCode::PageUp => conversation_scroll = conversation_scroll.saturating_sub(10),
                    KeyCode::PageDown => conversation_scroll = conversation_scroll.saturating_add(10),
                    KeyCode::Home => conversation_scroll = 0,
                    KeyCode::End => conversation_scroll = usize::MAX,
                    _ => {}
                },
            }
        }

        let mut scroll_info = (0usize, 0usize);
        terminal.draw(|f| {
            draw(f, &state, &input_buffer, conversation_scroll, selector, &mut scroll_info);
        })?;
        let (total_lines, viewport_height) = scroll_info;
        conversation_scroll = conversation_scroll.min(total_lines.saturating_sub(viewport_height));

        tokio::task::yield_now().await;
    }
    Ok(())
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> anyhow::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
