//! Chat screen rendering: header, messages, typing line, error banner,
//! compose box and status bar.

use chrono::Local;
use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::app::App;
use super::compose;
use super::debug_log;
use crate::models::ChatMessage;
use crate::realtime::ConnectionState;
use crate::session::Phase;

/// Height of the debug log pane when visible.
const DEBUG_LOG_HEIGHT: u16 = 10;

/// Connectivity icon. Retries are silent, so every non-connected state
/// reads as offline except the very first connect.
fn connection_indicator(state: ConnectionState) -> (&'static str, Color) {
    match state {
        ConnectionState::Connected => ("\u{25CF} live", Color::Green),
        ConnectionState::Connecting => ("\u{25CC} connecting", Color::Yellow),
        _ => ("\u{25CB} offline", Color::Red),
    }
}

/// Main render function
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();
    let view = &app.view;

    let show_error = view.error.is_some();
    let debug_height = if app.debug_log.visible {
        DEBUG_LOG_HEIGHT
    } else {
        0
    };

    let [header_area, messages_area, typing_area, error_area, compose_area, debug_area, status_area] =
        Layout::vertical([
            Constraint::Length(1),
            Constraint::Fill(1),
            Constraint::Length(1),
            Constraint::Length(u16::from(show_error)),
            Constraint::Length(compose::COMPOSE_HEIGHT),
            Constraint::Length(debug_height),
            Constraint::Length(1),
        ])
        .areas(area);

    render_header(header_area, frame.buffer_mut(), app);

    match &view.phase {
        Phase::Unloaded | Phase::Loading => {
            render_notice(messages_area, frame.buffer_mut(), "Loading chat...", Color::Gray)
        }
        Phase::NoChatRoom => render_notice(
            messages_area,
            frame.buffer_mut(),
            "No chat room yet. A room opens once an employee is assigned to this appointment.\n\nPress Esc to go back.",
            Color::Yellow,
        ),
        Phase::Failed(reason) => render_notice(
            messages_area,
            frame.buffer_mut(),
            &format!("{}\n\nPress Esc to go back.", reason),
            Color::Red,
        ),
        Phase::Loaded { .. } | Phase::Unmounted => {
            render_messages(messages_area, frame.buffer_mut(), &view.messages, app.scroll_offset)
        }
    }

    if let Some(name) = &view.typing {
        let line = Line::from(Span::styled(
            format!(" {} is typing...", name),
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ));
        Paragraph::new(line).render(typing_area, frame.buffer_mut());
    }

    if let Some(error) = &view.error {
        let line = Line::from(vec![
            Span::styled(
                format!(" {} ", error),
                Style::default().fg(Color::White).bg(Color::Red),
            ),
            Span::styled("  Esc to dismiss", Style::default().fg(Color::Red)),
        ]);
        Paragraph::new(line).render(error_area, frame.buffer_mut());
    }

    compose::render(
        compose_area,
        frame,
        &app.compose,
        &view.counterpart,
        app.can_compose(),
    );

    if app.debug_log.visible {
        debug_log::render(debug_area, frame.buffer_mut(), &app.debug_log);
    }

    render_status(status_area, frame.buffer_mut());
}

/// Truncate to `max` display columns, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.width() <= max {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w + 1 > max {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('\u{2026}');
    out
}

/// Render the header bar
fn render_header(area: Rect, buf: &mut Buffer, app: &App) {
    let view = &app.view;
    let (icon, icon_color) = connection_indicator(view.connection);

    let mut right = vec![];
    if !view.counterpart.is_empty() {
        let (presence, color) = if view.other_online {
            ("\u{25CF}", Color::Green)
        } else {
            ("\u{25CB}", Color::DarkGray)
        };
        right.push(Span::styled(
            format!("{} ", view.counterpart),
            Style::default().fg(Color::Cyan),
        ));
        right.push(Span::styled(format!("{}  ", presence), Style::default().fg(color)));
    }
    right.push(Span::styled(format!("{} ", icon), Style::default().fg(icon_color)));

    let right_width: usize = right.iter().map(|s| s.content.width()).sum();
    let room = truncate(
        &view.title,
        (area.width as usize).saturating_sub(right_width + 2),
    );
    let left = Span::styled(
        format!(" {}", room),
        Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    let padding = (area.width as usize).saturating_sub(left.content.width() + right_width);

    let mut spans = vec![left, Span::raw(" ".repeat(padding))];
    spans.extend(right);
    Paragraph::new(Line::from(spans))
        .style(Style::default().bg(Color::DarkGray))
        .render(area, buf);
}

fn render_notice(area: Rect, buf: &mut Buffer, text: &str, color: Color) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    block.render(area, buf);
    if inner.height == 0 {
        return;
    }
    let top = inner.y + inner.height / 3;
    let text_area = Rect::new(inner.x, top, inner.width, inner.height.saturating_sub(top - inner.y));
    Paragraph::new(text)
        .style(Style::default().fg(color))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(text_area, buf);
}

/// Read state of one of the viewer's messages.
fn delivery_mark(msg: &ChatMessage) -> (&'static str, Color) {
    if msg.pending {
        ("\u{2026}", Color::DarkGray)
    } else if msg.is_read {
        ("\u{2713}\u{2713}", Color::Cyan)
    } else {
        ("\u{2713}", Color::DarkGray)
    }
}

/// Greedy word wrap by display width; long words are hard-split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        let mut used = 0;
        for word in paragraph.split_whitespace() {
            let word_width = word.width();
            let sep = usize::from(used > 0);
            if used + sep + word_width <= width {
                if sep == 1 {
                    line.push(' ');
                }
                line.push_str(word);
                used += sep + word_width;
                continue;
            }
            if used > 0 {
                lines.push(std::mem::take(&mut line));
                used = 0;
            }
            for c in word.chars() {
                let w = c.width().unwrap_or(0);
                if used + w > width {
                    lines.push(std::mem::take(&mut line));
                    used = 0;
                }
                line.push(c);
                used += w;
            }
        }
        lines.push(line);
    }
    lines
}

/// Flatten messages into display lines, oldest first.
fn build_message_lines(messages: &[ChatMessage], width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for msg in messages {
        let time = msg.sent_at.with_timezone(&Local).format("%H:%M").to_string();
        let (name, name_color) = if msg.is_own {
            ("You".to_string(), Color::Cyan)
        } else {
            (msg.sender_name.clone(), Color::Magenta)
        };

        let mut header = vec![
            Span::styled(
                name,
                Style::default().fg(name_color).add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  {}", time), Style::default().fg(Color::DarkGray)),
        ];
        if msg.is_own {
            let (mark, color) = delivery_mark(msg);
            header.push(Span::styled(format!("  {}", mark), Style::default().fg(color)));
        }
        lines.push(Line::from(header));

        for text in wrap(&msg.message, width.saturating_sub(2)) {
            lines.push(Line::from(Span::raw(format!("  {}", text))));
        }
        lines.push(Line::default());
    }
    lines
}

fn render_messages(area: Rect, buf: &mut Buffer, messages: &[ChatMessage], scroll_offset: usize) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    if messages.is_empty() {
        Paragraph::new(Line::from(Span::styled(
            " No messages yet. Say hello!",
            Style::default().fg(Color::DarkGray),
        )))
        .render(inner, buf);
        return;
    }

    let lines = build_message_lines(messages, inner.width.saturating_sub(1) as usize);
    let visible = inner.height as usize;
    let max_offset = lines.len().saturating_sub(visible);
    let offset = scroll_offset.min(max_offset);
    let end = lines.len() - offset;
    let start = end.saturating_sub(visible);

    for (row, line) in lines[start..end].iter().enumerate() {
        let line_area = Rect::new(inner.x + 1, inner.y + row as u16, inner.width - 1, 1);
        Paragraph::new(line.clone()).render(line_area, buf);
    }

    if offset > 0 {
        let x = inner.x + inner.width.saturating_sub(1);
        let y = inner.y + inner.height.saturating_sub(1);
        let cell = &mut buf[(x, y)];
        cell.set_char('v');
        cell.set_style(Style::default().fg(Color::DarkGray));
    }
}

/// Render the status bar
fn render_status(area: Rect, buf: &mut Buffer) {
    let line = Line::from(Span::styled(
        " Enter send  Esc back  PgUp/PgDn scroll  F12 log",
        Style::default().fg(Color::DarkGray),
    ));
    Paragraph::new(line).render(area, buf);
}
