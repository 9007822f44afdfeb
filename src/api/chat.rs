//! Chat REST endpoints

use async_trait::async_trait;

use super::client::{segment, ApiClient, ApiError};
use crate::models::{ChatMessage, ChatRoom, SendReceipt};

/// REST side of chat. The realtime side lives in `realtime::transport`.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Room attached to an appointment; `ApiError::NotFound` until an
    /// employee has been assigned.
    async fn chat_room_for_appointment(&self, appointment_id: &str) -> Result<ChatRoom, ApiError>;

    /// Full history, ascending by sent time.
    async fn messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, ApiError>;

    async fn send_message(&self, room_id: &str, text: &str) -> Result<SendReceipt, ApiError>;

    async fn mark_read(&self, room_id: &str) -> Result<(), ApiError>;

    /// Rooms the viewer participates in.
    async fn chat_rooms(&self) -> Result<Vec<ChatRoom>, ApiError>;
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn chat_room_for_appointment(&self, appointment_id: &str) -> Result<ChatRoom, ApiError> {
        self.get_json(&format!("/chat/appointment/{}", segment(appointment_id)))
            .await
    }

    async fn messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        self.get_json(&format!("/chat/{}/messages", segment(room_id))).await
    }

    async fn send_message(&self, room_id: &str, text: &str) -> Result<SendReceipt, ApiError> {
        let body = serde_json::json!({
            "chatRoomId": room_id,
            "message": text,
        });
        self.post_json("/chat/send", &body).await
    }

    async fn mark_read(&self, room_id: &str) -> Result<(), ApiError> {
        self.put_empty(&format!("/chat/{}/mark-read", segment(room_id))).await
    }

    async fn chat_rooms(&self) -> Result<Vec<ChatRoom>, ApiError> {
        self.get_json("/chat/rooms").await
    }
}
