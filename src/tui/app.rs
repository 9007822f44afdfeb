//! Chat TUI state and main event loop
//!
//! The session controller runs in its own task. This loop only renders
//! the latest `ChatView` snapshot and turns key presses into
//! `ChatCommand`s.

use anyhow::Result;
use crossterm::event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::DefaultTerminal;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;

use super::chat_view;
use super::compose::ComposeState;
use super::debug_log::DebugLogState;
use super::log_capture::LogBuffer;
use crate::session::{ChatCommand, ChatSession, ChatView, Phase};

/// Redraw interval while idle (debug log refresh).
const TICK: Duration = Duration::from_millis(250);

/// Lines moved per PageUp/PageDown.
const PAGE: usize = 5;

/// Application state
pub struct App {
    pub should_exit: bool,
    /// Latest snapshot from the session.
    pub view: ChatView,
    pub compose: ComposeState,
    pub debug_log: DebugLogState,
    /// Message scroll, in lines from the bottom (0 follows new messages).
    pub scroll_offset: usize,
}

impl App {
    pub fn new(log_buffer: LogBuffer) -> Self {
        Self {
            should_exit: false,
            view: ChatView::default(),
            compose: ComposeState::default(),
            debug_log: DebugLogState::new(log_buffer),
            scroll_offset: 0,
        }
    }

    pub fn can_compose(&self) -> bool {
        matches!(self.view.phase, Phase::Loaded { .. })
    }

    /// Map a key press to local state changes and, where needed, a command
    /// for the session.
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<ChatCommand> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => {
                self.should_exit = true;
                Some(ChatCommand::Close)
            }
            KeyCode::Esc if self.view.error.is_some() => Some(ChatCommand::DismissError),
            KeyCode::Esc => {
                self.should_exit = true;
                Some(ChatCommand::Close)
            }
            KeyCode::F(12) => {
                self.debug_log.toggle();
                None
            }
            KeyCode::PageUp if self.debug_log.visible => {
                self.debug_log.scroll_up(PAGE);
                None
            }
            KeyCode::PageDown if self.debug_log.visible => {
                self.debug_log.scroll_down(PAGE);
                None
            }
            KeyCode::PageUp => {
                self.scroll_offset = self.scroll_offset.saturating_add(PAGE);
                None
            }
            KeyCode::PageDown => {
                self.scroll_offset = self.scroll_offset.saturating_sub(PAGE);
                None
            }
            _ if !self.can_compose() => None,
            KeyCode::Enter => {
                let text = self.compose.take()?;
                self.scroll_offset = 0;
                Some(ChatCommand::Send(text))
            }
            KeyCode::Char('u') if ctrl => {
                self.compose.clear();
                None
            }
            KeyCode::Char(c) if !ctrl => {
                self.compose.insert_char(c);
                Some(ChatCommand::Input)
            }
            KeyCode::Backspace => self.compose.backspace().then_some(ChatCommand::Input),
            KeyCode::Delete => self.compose.delete().then_some(ChatCommand::Input),
            KeyCode::Left => {
                self.compose.move_left();
                None
            }
            KeyCode::Right => {
                self.compose.move_right();
                None
            }
            KeyCode::Home => {
                self.compose.move_home();
                None
            }
            KeyCode::End => {
                self.compose.move_end();
                None
            }
            _ => None,
        }
    }

    /// Render the UI
    pub fn render(&self, frame: &mut ratatui::Frame) {
        chat_view::render(frame, self);
    }
}

/// Open the chat view for one appointment. Returns when the user leaves.
pub async fn run_chat(mut session: ChatSession, log_buffer: LogBuffer) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(session.view());

    let driver = tokio::spawn(async move {
        // Errors are part of the published view.
        let _ = session.mount().await;
        session.run(cmd_rx, view_tx).await;
    });

    // ratatui::init installs a panic hook that restores the terminal.
    let mut terminal = ratatui::init();
    let result = run_app(&mut terminal, App::new(log_buffer), &cmd_tx, view_rx).await;
    ratatui::restore();

    let _ = cmd_tx.send(ChatCommand::Close);

    if let Err(e) = driver.await {
        tracing::warn!("Chat session task ended abnormally: {}", e);
    }
    result
}

async fn run_app(
    terminal: &mut DefaultTerminal,
    mut app: App,
    commands: &mpsc::UnboundedSender<ChatCommand>,
    mut view_rx: watch::Receiver<ChatView>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut tick = tokio::time::interval(TICK);

    while !app.should_exit {
        app.view = view_rx.borrow_and_update().clone();
        app.debug_log.refresh();
        terminal.draw(|frame| app.render(frame))?;

        tokio::select! {
            event = events.next() => match event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(cmd) = app.handle_key(key) {
                        if commands.send(cmd).is_err() {
                            tracing::error!("Chat session closed -- command dropped");
                            app.should_exit = true;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => app.should_exit = true,
            },
            changed = view_rx.changed() => {
                if changed.is_err() {
                    app.should_exit = true;
                }
            }
            _ = tick.tick() => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn loaded_app() -> App {
        let mut app = App::new(LogBuffer::new());
        app.view.phase = Phase::Loaded { live: true };
        app
    }

    #[test]
    fn test_typing_and_send() {
        let mut app = loaded_app();
        assert_eq!(app.handle_key(key(KeyCode::Char('h'))), Some(ChatCommand::Input));
        assert_eq!(app.handle_key(key(KeyCode::Char('i'))), Some(ChatCommand::Input));
        assert_eq!(app.handle_key(key(KeyCode::Left)), None);
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Some(ChatCommand::Send("hi".into())));
        assert!(app.compose.input.is_empty());
        // Blank input sends nothing.
        assert_eq!(app.handle_key(key(KeyCode::Enter)), None);
        assert_eq!(app.handle_key(key(KeyCode::Backspace)), None);
    }

    #[test]
    fn test_compose_disabled_until_loaded() {
        let mut app = App::new(LogBuffer::new());
        app.view.phase = Phase::Loading;
        assert_eq!(app.handle_key(key(KeyCode::Char('x'))), None);
        assert!(app.compose.input.is_empty());

        app.view.phase = Phase::NoChatRoom;
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Some(ChatCommand::Close));
        assert!(app.should_exit);
    }

    #[test]
    fn test_escape_dismisses_error_first() {
        let mut app = loaded_app();
        app.view.error = Some("Failed to send message".into());
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Some(ChatCommand::DismissError));
        assert!(!app.should_exit);

        app.view.error = None;
        assert_eq!(app.handle_key(key(KeyCode::Esc)), Some(ChatCommand::Close));
        assert!(app.should_exit);
    }

    #[test]
    fn test_ctrl_c_always_closes() {
        let mut app = App::new(LogBuffer::new());
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(app.handle_key(ctrl_c), Some(ChatCommand::Close));
        assert!(app.should_exit);
    }

    #[test]
    fn test_scroll_and_debug_toggle() {
        let mut app = loaded_app();
        app.handle_key(key(KeyCode::PageUp));
        app.handle_key(key(KeyCode::PageUp));
        app.handle_key(key(KeyCode::PageDown));
        assert_eq!(app.scroll_offset, PAGE);

        app.handle_key(key(KeyCode::F(12)));
        assert!(app.debug_log.visible);
        // Paging now scrolls the log instead.
        app.handle_key(key(KeyCode::PageDown));
        assert_eq!(app.scroll_offset, PAGE);
    }
}
