//! Chat-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::wire;

/// Chat room attached to an appointment.
///
/// Created server-side once an employee is assigned; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(deserialize_with = "wire::id")]
    pub appointment_id: String,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub vehicle_name: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
}

impl ChatRoom {
    /// Display name of whoever is on the other side of the conversation.
    pub fn counterpart_name(&self, viewer_id: &str) -> &str {
        let viewer_is_customer = self.customer_id.as_deref() == Some(viewer_id);
        let name = if viewer_is_customer {
            self.employee_name.as_deref()
        } else {
            self.customer_name.as_deref()
        };
        name.filter(|n| !n.is_empty()).unwrap_or("Service team")
    }

    /// One-line title: vehicle and service labels when known.
    pub fn title(&self) -> String {
        match (self.vehicle_name.as_deref(), self.service_type.as_deref()) {
            (Some(v), Some(s)) => format!("{} - {}", v, s),
            (Some(v), None) => v.to_string(),
            (None, Some(s)) => s.to_string(),
            (None, None) => format!("Appointment #{}", self.appointment_id),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "wire::id")]
    pub id: String,
    #[serde(deserialize_with = "wire::id")]
    pub chat_room_id: String,
    #[serde(deserialize_with = "wire::id")]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(alias = "content", alias = "body")]
    pub message: String,
    #[serde(deserialize_with = "wire::timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    /// Derived: sent by the current viewer.
    #[serde(skip)]
    pub is_own: bool,
    /// Local placeholder awaiting its echo (optimistic send policy only).
    #[serde(skip)]
    pub pending: bool,
}

impl ChatMessage {
    /// Set the derived ownership flag for the given viewer.
    pub fn for_viewer(mut self, viewer_id: &str) -> Self {
        self.is_own = self.sender_id == viewer_id;
        self
    }
}

/// Ephemeral "someone is typing" signal. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    #[serde(deserialize_with = "wire::id")]
    pub chat_room_id: String,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    pub is_typing: bool,
}

/// Presence status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Presence of a chat participant within a room. Last write wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(deserialize_with = "wire::id")]
    pub user_id: String,
    #[serde(deserialize_with = "wire::id")]
    pub chat_room_id: String,
    pub status: PresenceStatus,
}

/// Notice that a participant has read the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    #[serde(deserialize_with = "wire::id")]
    pub chat_room_id: String,
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub user_id: Option<String>,
}

/// Response of the REST send endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    #[serde(deserialize_with = "wire::id")]
    pub message_id: String,
    #[serde(deserialize_with = "wire::timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
}
