//! Compose box: single-line message input.

use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Paragraph, Widget},
    Frame,
};
use unicode_width::UnicodeWidthChar;

/// State for the compose box.
#[derive(Default)]
pub struct ComposeState {
    /// Current input text.
    pub input: String,
    /// Cursor position (character offset into `input`).
    pub cursor_pos: usize,
}

impl ComposeState {
    /// Insert a character at the current cursor position.
    pub fn insert_char(&mut self, c: char) {
        let byte_pos = self.char_to_byte(self.cursor_pos);
        self.input.insert(byte_pos, c);
        self.cursor_pos += 1;
    }

    /// Delete the character before the cursor (backspace).
    pub fn backspace(&mut self) -> bool {
        if self.cursor_pos == 0 {
            return false;
        }
        let byte_pos = self.char_to_byte(self.cursor_pos);
        let prev_byte_pos = self.char_to_byte(self.cursor_pos - 1);
        self.input.drain(prev_byte_pos..byte_pos);
        self.cursor_pos -= 1;
        true
    }

    /// Delete the character at the cursor (delete key).
    pub fn delete(&mut self) -> bool {
        let char_count = self.input.chars().count();
        if self.cursor_pos >= char_count {
            return false;
        }
        let byte_pos = self.char_to_byte(self.cursor_pos);
        let next_byte_pos = self.char_to_byte(self.cursor_pos + 1);
        self.input.drain(byte_pos..next_byte_pos);
        true
    }

    pub fn move_left(&mut self) {
        self.cursor_pos = self.cursor_pos.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        let char_count = self.input.chars().count();
        if self.cursor_pos < char_count {
            self.cursor_pos += 1;
        }
    }

    pub fn move_home(&mut self) {
        self.cursor_pos = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor_pos = self.input.chars().count();
    }

    /// Clear all input text (Ctrl+U).
    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor_pos = 0;
    }

    /// Take the trimmed text and clear the box. `None` when blank.
    pub fn take(&mut self) -> Option<String> {
        let text = self.input.trim().to_string();
        if text.is_empty() {
            return None;
        }
        self.clear();
        Some(text)
    }

    /// Convert a char-based cursor position to a byte offset.
    fn char_to_byte(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}

/// Border + input line + border.
pub const COMPOSE_HEIGHT: u16 = 3;

/// Render the compose box; `enabled` is false until the chat has loaded.
pub fn render(area: Rect, frame: &mut Frame, state: &ComposeState, counterpart: &str, enabled: bool) {
    let border_style = if enabled {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(border_style);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.height == 0 || inner.width == 0 {
        return;
    }

    let input_area = Rect::new(inner.x, inner.y, inner.width, 1);
    let display = display_text(&state.input, state.cursor_pos, input_area.width as usize);
    render_input(input_area, frame.buffer_mut(), state, &display, counterpart, enabled);

    if enabled {
        let cx = input_area.x + 1 + display.cursor_offset as u16;
        frame.set_cursor_position((cx, input_area.y));
    }
}

fn render_input(
    area: Rect,
    buf: &mut Buffer,
    state: &ComposeState,
    display: &DisplayText,
    counterpart: &str,
    enabled: bool,
) {
    let line = if state.input.is_empty() {
        let placeholder = if enabled {
            format!(" Message {}...", counterpart)
        } else {
            " Waiting for chat...".to_string()
        };
        Line::from(Span::styled(placeholder, Style::default().fg(Color::DarkGray)))
    } else {
        Line::from(Span::styled(
            format!(" {}", display.visible),
            Style::default().fg(Color::White),
        ))
    };
    Paragraph::new(line).render(area, buf);
}

/// What to draw and where the cursor lands, in columns.
struct DisplayText {
    visible: String,
    cursor_offset: usize,
}

/// Scroll the input horizontally so the cursor stays visible.
fn display_text(input: &str, cursor_pos: usize, width: usize) -> DisplayText {
    // One column of left margin, one for the cursor past the end.
    let avail = width.saturating_sub(2);
    let chars: Vec<(char, usize)> = input
        .chars()
        .map(|c| (c, c.width().unwrap_or(0)))
        .collect();

    let cursor_pos = cursor_pos.min(chars.len());
    let mut start = 0;
    let mut cursor_col: usize = chars[..cursor_pos].iter().map(|(_, w)| w).sum();
    while cursor_col > avail && start < cursor_pos {
        cursor_col -= chars[start].1;
        start += 1;
    }

    let mut visible = String::new();
    let mut used = 0;
    for &(c, w) in &chars[start..] {
        if used + w > avail {
            break;
        }
        visible.push(c);
        used += w;
    }

    DisplayText {
        visible,
        cursor_offset: cursor_col,
    }
}
