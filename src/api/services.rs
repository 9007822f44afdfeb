//! Appointment ("service") REST endpoints

use async_trait::async_trait;

use super::client::{ApiClient, ApiError};
use crate::models::{AppointmentSummary, ServiceCenter};

#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// All appointments booked by `user_id`.
    async fn appointments(&self, user_id: &str) -> Result<Vec<AppointmentSummary>, ApiError>;

    /// Service centre directory, used to locate centres by name.
    async fn service_centers(&self) -> Result<Vec<ServiceCenter>, ApiError>;
}

#[async_trait]
impl ServiceApi for ApiClient {
    async fn appointments(&self, user_id: &str) -> Result<Vec<AppointmentSummary>, ApiError> {
        let user: String = url::form_urlencoded::byte_serialize(user_id.as_bytes()).collect();
        self.get_json(&format!("/slot-appointments?userId={}", user))
            .await
    }

    async fn service_centers(&self) -> Result<Vec<ServiceCenter>, ApiError> {
        self.get_json("/service-centers").await
    }
}
