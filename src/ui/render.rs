//! 界面渲染
//!
//! 标题栏显示阶段、当前 Agent 与模型；主体为对话历史（按角色着色、工具结果折叠、按宽度换行）
//! 与实时流式缓冲；底部为提示行与输入框。模型选择器以弹窗形式覆盖在对话区上。

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame,
};

use crate::core::{AgentPhase, UiState};
use crate::llm::ModelCatalog;
use crate::session::{Message, Role};

/// 单条消息在 UI 中显示的最大字符数
const MAX_DISPLAY_CHARS: usize = 1200;
/// 工具结果的显示上限（多为原始 JSON/网页文本）
const MAX_TOOL_DISPLAY_CHARS: usize = 280;

/// 对过长内容做折叠：保留前 N 字 + 省略提示
fn truncate_for_display(m: &Message) -> String {
    let limit = if m.role == Role::Tool {
        MAX_TOOL_DISPLAY_CHARS
    } else {
        MAX_DISPLAY_CHARS
    };
    let total = m.content.chars().count();
    if total <= limit {
        return m.content.clone();
    }
    let head: String = m.content.chars().take(limit).collect();
    format!("{head}\n... [{} more characters hidden]", total - limit)
}

/// 按宽度换行（按字符数，避免在 UTF-8 中间截断）
fn wrap_text(s: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![s.to_string()];
    }
    let mut lines = Vec::new();
    for para in s.split('\n') {
        let mut line = String::new();
        let mut count = 0usize;
        for ch in para.chars() {
            if count >= width {
                lines.push(std::mem::take(&mut line));
                count = 0;
            }
            line.push(ch);
            count += 1;
        }
        lines.push(line);
    }
    lines
}

fn role_style(m: &Message) -> (String, Color) {
    match m.role {
        Role::User => ("You".to_string(), Color::Cyan),
        Role::Assistant => (m.agent.clone().unwrap_or_else(|| "Assistant".to_string()), Color::Green),
        Role::System => ("Sys".to_string(), Color::Gray),
        Role::Tool => ("Tool".to_string(), Color::Magenta),
    }
}

fn push_block<'a>(lines: &mut Vec<Line<'a>>, label: String, color: Color, body: &str, width: usize) {
    let pad = " ".repeat(label.chars().count() + 1);
    for (i, line) in wrap_text(body, width).into_iter().enumerate() {
        let pref = if i == 0 { format!("{label} ") } else { pad.clone() };
        lines.push(Line::from(vec![
            Span::styled(pref, Style::default().fg(color).add_modifier(Modifier::BOLD)),
            Span::raw(line),
        ]));
    }
}

fn phase_text(state: &UiState) -> String {
    match (state.phase, state.active_tool.as_deref()) {
        (AgentPhase::ToolExecuting, Some(tool)) => format!("Running {tool}"),
        (phase, _) => phase.label().to_string(),
    }
}

/// 绘制一帧；将 (总行数, 可视高度) 写入 out 供外部 clamp 滚动
pub fn draw(
    f: &mut Frame,
    state: &UiState,
    input_buffer: &str,
    conversation_scroll: usize,
    selector: Option<usize>,
    out: &mut (usize, usize),
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(1), Constraint::Length(5)])
        .split(f.area());

    let conv_area = chunks[0];
    let content_width = conv_area.width.saturating_sub(3).max(20) as usize; // 边框 + 滚动条

    let title = format!(
        " Relay │ {} │ {} │ {} ",
        phase_text(state),
        state.active_agent,
        ModelCatalog::display_name(&state.active_model)
    );
    let border = if state.phase == AgentPhase::Error {
        Color::Red
    } else {
        Color::Yellow
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border));

    let mut text_lines: Vec<Line> = Vec::new();
    for (idx, m) in state.history.iter().enumerate() {
        if idx > 0 {
            text_lines.push(Line::from(""));
        }
        let (label, color) = role_style(m);
        let mut body = truncate_for_display(m);
        if m.truncated {
            body.push_str("\n[response truncated]");
        }
        push_block(&mut text_lines, label, color, &body, content_width.saturating_sub(12));
    }
    if !state.streaming.is_empty() {
        if !text_lines.is_empty() {
            text_lines.push(Line::from(""));
        }
        push_block(
            &mut text_lines,
            state.active_agent.clone(),
            Color::LightGreen,
            &format!("{}▌", state.streaming),
            content_width.saturating_sub(12),
        );
    }

    let content_height = conv_area.height.saturating_sub(2) as usize;
    let total_lines = text_lines.len();
    let max_scroll = total_lines.saturating_sub(content_height);
    let scroll_offset = conversation_scroll.min(max_scroll);

    let paragraph = Paragraph::new(Text::from(text_lines))
        .block(block)
        .scroll((scroll_offset as u16, 0));
    f.render_widget(paragraph, conv_area);

    if total_lines > content_height {
        let mut scrollbar_state = ScrollbarState::new(total_lines)
            .position(scroll_offset)
            .viewport_content_length(content_height);
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .thumb_symbol("█")
            .track_symbol(Some("░"));
        f.render_stateful_widget(scrollbar, conv_area, &mut scrollbar_state);
    }

    // 提示行：错误优先，其次命令反馈
    let status = match (&state.error_message, &state.notice) {
        (Some(err), _) => Span::styled(format!(" {err}"), Style::default().fg(Color::Red)),
        (None, Some(notice)) => Span::styled(
            format!(" {}", notice.lines().next().unwrap_or_default()),
            Style::default().fg(Color::Yellow),
        ),
        (None, None) => Span::raw(""),
    };
    f.render_widget(Paragraph::new(Line::from(status)), chunks[1]);

    let input_title = if state.input_locked {
        " Waiting for response… (Ctrl+C to cancel) "
    } else {
        " Message (/help for commands) "
    };
    let hint = " Enter send │ ↑↓ PgUp/PgDn scroll │ Ctrl+C cancel │ Ctrl+L clear │ Ctrl+Q quit ";
    let input_block = Block::default()
        .title(input_title)
        .title_bottom(Line::from(Span::styled(hint, Style::default().fg(Color::DarkGray))))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Blue));
    let input = Paragraph::new(input_buffer).block(input_block).style(if state.input_locked {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    });
    f.render_widget(input, chunks[2]);

    if let Some(index) = selector {
        draw_model_selector(f, conv_area, &state.active_model, index);
    }

    out.0 = total_lines;
    out.1 = content_height;
}

fn draw_model_selector(f: &mut Frame, area: Rect, active: &str, index: usize) {
    let models = ModelCatalog::all();
    let height = (models.len() as u16 + 2).min(area.height);
    let width = area.width.saturating_sub(8).min(90);
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height,
    };

    let items: Vec<ListItem> = models
        .iter()
        .map(|m| {
            let marker = if m.id == active { "● " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::raw(marker),
                Span::styled(m.name, Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(format!("  {}", m.description), Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();
    let list = List::new(items)
        .block(
            Block::default()
                .title(" Select model (Enter choose, Esc close) ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .highlight_style(Style::default().bg(Color::DarkGray));
    let mut list_state = ListState::default().with_selected(Some(index.min(models.len().saturating_sub(1))));

    f.render_widget(Clear, popup);
    f.render_stateful_widget(list, popup, &mut list_state);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_by_chars() {
        assert_eq!(wrap_text("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(wrap_text("a\n\nb", 4), vec!["a", "", "b"]);
    }

    #[test]
    fn folds_long_tool_results() {
        let m = Message::tool("x".repeat(1000));
        let shown = truncate_for_display(&m);
        assert!(shown.contains("720 more characters hidden"));
    }
}
