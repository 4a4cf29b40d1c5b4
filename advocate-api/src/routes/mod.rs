/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check and service info
/// - `cases`: The caller's cases
/// - `users`: The caller's profile, preferences and devices
/// - `reminders`: Manual reminder sweep trigger
///
/// Successful responses share one envelope:
///
/// ```json
/// { "success": true, "count": 2, "data": [ ... ] }
/// ```

pub mod cases;
pub mod health;
pub mod reminders;
pub mod users;

use crate::error::ApiError;
use axum::extract::FromRequest;
use serde::Serialize;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    /// Number of items, for list responses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            count: None,
            message: None,
            data,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T> ApiResponse<Vec<T>> {
    pub fn list(items: Vec<T>) -> Self {
        Self {
            success: true,
            count: Some(items.len()),
            message: None,
            data: items,
        }
    }
}

/// `Json` extractor whose rejections use the API error body
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);
