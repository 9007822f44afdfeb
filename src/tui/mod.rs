//! Terminal chat view

mod app;
mod chat_view;
mod compose;
mod debug_log;
pub mod log_capture;

pub use app::run_chat;
