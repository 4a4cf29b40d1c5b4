/// Profile, preference and device endpoints for the caller
///
/// # Endpoints
///
/// - `GET    /api/users/me` - Profile (created on first sign-in)
/// - `PUT    /api/users/me/preferences` - Display name and notification flags
/// - `POST   /api/users/me/devices` - Register a push device token
/// - `DELETE /api/users/me/devices` - Deregister one device token
/// - `DELETE /api/users/me/devices/all` - Deregister every device
///
/// Device tokens never appear in responses or logs; only their count and a
/// fingerprint do.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{ApiResponse, JsonBody},
};
use advocate_shared::auth::AuthContext;
use advocate_shared::models::{token_fingerprint, validate_device_token, User, UserPreferences};
use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Profile as returned to its owner
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    #[serde(flatten)]
    pub user: User,

    pub device_count: usize,
}

impl From<User> for ProfileView {
    fn from(user: User) -> Self {
        Self {
            device_count: user.device_tokens.len(),
            user,
        }
    }
}

/// Preference update; absent fields are left unchanged
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesRequest {
    #[validate(length(min = 1, max = 100, message = "Display name must be 1-100 characters"))]
    pub display_name: Option<String>,

    pub notifications_enabled: Option<bool>,

    pub email_notifications_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceRequest {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_count: usize,
}

fn user_not_found() -> ApiError {
    ApiError::NotFound("User not found".to_string())
}

fn device_token(req: &DeviceRequest) -> ApiResult<&str> {
    let token = req.token.trim();
    validate_device_token(token).map_err(|msg| ApiError::invalid("token", msg))?;
    Ok(token)
}

/// Caller's profile
///
/// The record was found or created while authenticating, so this never
/// touches the store again.
pub async fn get_me(Extension(auth): Extension<AuthContext>) -> Json<ApiResponse<ProfileView>> {
    Json(ApiResponse::ok(auth.user.into()))
}

/// Updates display name and notification flags
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Invalid display name or empty update
pub async fn update_preferences(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(mut req): JsonBody<PreferencesRequest>,
) -> ApiResult<Json<ApiResponse<ProfileView>>> {
    if let Some(name) = req.display_name.as_mut() {
        *name = name.trim().to_string();
    }
    req.validate()?;

    let prefs = UserPreferences {
        display_name: req.display_name,
        notifications_enabled: req.notifications_enabled,
        email_notifications_enabled: req.email_notifications_enabled,
    };
    if prefs.is_empty() {
        return Err(ApiError::invalid("body", "No preferences to update"));
    }

    let user = state
        .store
        .update_preferences(&auth.user_id, prefs, state.clock.now())
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!(
        user_id = %auth.user_id,
        notifications_enabled = user.notifications_enabled,
        "Preferences updated"
    );
    Ok(Json(
        ApiResponse::ok(user.into()).with_message("Preferences updated successfully"),
    ))
}

/// Registers a device token; registering it again is harmless
pub async fn register_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<DeviceRequest>,
) -> ApiResult<Json<ApiResponse<DeviceSummary>>> {
    let token = device_token(&req)?;
    let user = state
        .store
        .add_device_token(&auth.user_id, token, state.clock.now())
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!(
        user_id = %auth.user_id,
        device = %token_fingerprint(token),
        device_count = user.device_tokens.len(),
        "Device registered"
    );
    Ok(Json(
        ApiResponse::ok(DeviceSummary {
            device_count: user.device_tokens.len(),
        })
        .with_message("Device registered successfully"),
    ))
}

pub async fn remove_device(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    JsonBody(req): JsonBody<DeviceRequest>,
) -> ApiResult<Json<ApiResponse<DeviceSummary>>> {
    let token = device_token(&req)?;
    let user = state
        .store
        .remove_device_token(&auth.user_id, token, state.clock.now())
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!(
        user_id = %auth.user_id,
        device = %token_fingerprint(token),
        "Device removed"
    );
    Ok(Json(
        ApiResponse::ok(DeviceSummary {
            device_count: user.device_tokens.len(),
        })
        .with_message("Device removed successfully"),
    ))
}

pub async fn clear_devices(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<DeviceSummary>>> {
    let user = state
        .store
        .clear_device_tokens(&auth.user_id, state.clock.now())
        .await?
        .ok_or_else(user_not_found)?;

    tracing::info!(user_id = %auth.user_id, "All devices removed");
    Ok(Json(
        ApiResponse::ok(DeviceSummary {
            device_count: user.device_tokens.len(),
        })
        .with_message("All devices removed successfully"),
    ))
}
