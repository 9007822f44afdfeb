//! Typed decode of chat push payloads, plus the broker's topic layout.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::models::{ChatMessage, ReadReceipt, TypingIndicator, UserStatus};

pub const SEND_DESTINATION: &str = "/app/chat.send";
pub const TYPING_DESTINATION: &str = "/app/chat.typing";
pub const MARK_READ_DESTINATION: &str = "/app/chat.markRead";
pub const JOIN_DESTINATION: &str = "/app/chat.join";

/// The four per-room topics the chat view listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomTopic {
    Messages,
    Typing,
    ReadReceipts,
    Status,
}

impl RoomTopic {
    pub const ALL: [RoomTopic; 4] = [
        RoomTopic::Messages,
        RoomTopic::Typing,
        RoomTopic::ReadReceipts,
        RoomTopic::Status,
    ];

    pub fn destination(&self, room_id: &str) -> String {
        match self {
            RoomTopic::Messages => format!("/topic/chat/{}", room_id),
            RoomTopic::Typing => format!("/topic/chat/{}/typing", room_id),
            RoomTopic::ReadReceipts => format!("/topic/chat/{}/read", room_id),
            RoomTopic::Status => format!("/topic/chat/{}/status", room_id),
        }
    }
}

/// Payload shape did not match what the topic promises.
#[derive(Debug, Error)]
#[error("malformed {topic:?} payload: {source}")]
pub struct DecodeError {
    pub topic: RoomTopic,
    #[source]
    pub source: serde_json::Error,
}

/// A decoded event from one of the room topics.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(ChatMessage),
    Typing(TypingIndicator),
    ReadReceipt(ReadReceipt),
    Status(UserStatus),
}

impl ChatEvent {
    /// Decode a MESSAGE body according to the topic it arrived on.
    pub fn decode(topic: RoomTopic, body: &str) -> Result<ChatEvent, DecodeError> {
        fn parse<T: DeserializeOwned>(topic: RoomTopic, body: &str) -> Result<T, DecodeError> {
            serde_json::from_str(body).map_err(|source| DecodeError { topic, source })
        }

        Ok(match topic {
            RoomTopic::Messages => ChatEvent::Message(parse(topic, body)?),
            RoomTopic::Typing => ChatEvent::Typing(parse(topic, body)?),
            RoomTopic::ReadReceipts => ChatEvent::ReadReceipt(parse(topic, body)?),
            RoomTopic::Status => ChatEvent::Status(parse(topic, body)?),
        })
    }
}
