//! REST API client module

mod chat;
pub mod client;
mod services;

pub use chat::ChatApi;
pub use client::{ApiClient, ApiError};
pub use services::ServiceApi;
