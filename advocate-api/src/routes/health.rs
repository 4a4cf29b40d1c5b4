/// Health check and service info
///
/// # Endpoints
///
/// ```text
/// GET /api/health
/// GET /api
/// ```
///
/// # Health Response
///
/// ```json
/// {
///   "success": true,
///   "status": "healthy",
///   "message": "Server is running",
///   "version": "0.1.0",
///   "store": "postgres",
///   "storeStatus": "connected",
///   "uptimeSecs": 42,
///   "timestamp": "2026-03-10T03:30:00Z"
/// }
/// ```

use crate::app::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,

    /// "healthy" or "degraded"
    pub status: String,

    pub message: String,

    /// Application version
    pub version: String,

    /// Record Store backend name
    pub store: String,

    /// "connected" or "disconnected"
    pub store_status: String,

    pub uptime_secs: u64,

    pub timestamp: DateTime<Utc>,
}

/// Service info response
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub success: bool,
    pub name: String,
    pub version: String,
}

/// Health check handler
///
/// Always answers 200; an unreachable store shows up as `degraded`.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: record store unreachable");
            false
        }
    };

    Json(HealthResponse {
        success: true,
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        message: "Server is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: state.store.backend().to_string(),
        store_status: if connected { "connected" } else { "disconnected" }.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: state.clock.now(),
    })
}

pub async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        success: true,
        name: "Advocate Reminder API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
