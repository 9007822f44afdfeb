//! Debug pane (F12) showing captured tracing output.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget},
};

use super::log_capture::LogBuffer;

/// Scroll history kept by the pane.
const HISTORY: usize = 1000;

pub struct DebugLogState {
    source: LogBuffer,
    history: Vec<String>,
    pub visible: bool,
    /// Lines scrolled up from the newest entry.
    offset: usize,
}

impl DebugLogState {
    pub fn new(source: LogBuffer) -> Self {
        Self {
            source,
            history: Vec::new(),
            visible: false,
            offset: 0,
        }
    }

    /// Pull newly captured lines. Called once per frame.
    pub fn refresh(&mut self) {
        self.history.extend(self.source.drain());
        if self.history.len() > HISTORY {
            let excess = self.history.len() - HISTORY;
            self.history.drain(..excess);
            self.offset = self.offset.saturating_sub(excess);
        }
    }

    /// Show or hide the pane. Opening jumps to the newest line.
    pub fn toggle(&mut self) {
        self.visible = !self.visible;
        if self.visible {
            self.offset = 0;
        }
    }

    pub fn scroll_up(&mut self, n: usize) {
        let max = self.history.len().saturating_sub(1);
        self.offset = (self.offset + n).min(max);
    }

    pub fn scroll_down(&mut self, n: usize) {
        self.offset = self.offset.saturating_sub(n);
    }

    /// The `height` lines ending `offset` lines above the newest.
    fn window(&self, height: usize) -> &[String] {
        let end = self.history.len().saturating_sub(self.offset);
        &self.history[end.saturating_sub(height)..end]
    }
}

pub fn render(area: Rect, buf: &mut Buffer, state: &DebugLogState) {
    let title = if state.offset > 0 {
        format!(" Log (+{}) ", state.offset)
    } else {
        " Log ".to_string()
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            title,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
    let inner = block.inner(area);
    block.render(area, buf);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let lines: Vec<Line> = state
        .window(inner.height as usize)
        .iter()
        .map(|line| Line::from(Span::styled(line.clone(), Style::default().fg(level_color(line)))))
        .collect();
    Paragraph::new(lines).render(inner, buf);
}

/// Color by the level column of the fmt layer output.
fn level_color(line: &str) -> Color {
    let level = line
        .split_whitespace()
        .find(|word| matches!(*word, "ERROR" | "WARN" | "INFO" | "DEBUG" | "TRACE"));
    match level {
        Some("ERROR") => Color::Red,
        Some("WARN") => Color::Yellow,
        Some("INFO") => Color::Green,
        Some(_) => Color::DarkGray,
        None => Color::White,
    }
}
