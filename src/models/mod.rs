//! Data models for chat and service-tracking entities

mod chat;
mod service;
pub mod wire;

pub use chat::*;
pub use service::*;

/// The logged-in user, as far as the realtime layer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub name: String,
}

impl Viewer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Whether an event subject refers to this viewer.
    ///
    /// Matches on id when the event carries one, otherwise on display name.
    pub fn is_subject(&self, user_id: Option<&str>, user_name: Option<&str>) -> bool {
        match user_id {
            Some(id) if !id.is_empty() => id == self.id,
            _ => user_name.is_some_and(|n| n == self.name),
        }
    }
}
