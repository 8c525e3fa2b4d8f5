//! Request and response shapes for the boundary facade.

pub mod admin;
pub mod auth;
pub mod oauth;

use serde::Serialize;

pub use service_core::error::ErrorBody as ErrorResponse;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
