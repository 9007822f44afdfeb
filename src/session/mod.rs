//! Session controllers: the state behind the chat view and the live
//! service list. They talk to the backend only through the `api` and
//! `realtime` traits, so both can be driven by fakes.

pub mod chat;
pub mod services;

pub use chat::{ChatCommand, ChatSession, ChatView, Phase, SendPolicy};
pub use services::{LiveServices, ServicesView};
