/// Manual reminder sweep trigger
///
/// # Endpoint
///
/// ```text
/// POST /api/reminders/run
/// Authorization: Bearer <id_token>
/// ```
///
/// Runs the same sweep the daily scheduler runs and returns its summary. If a
/// run is already in progress the request waits for it and then finds nothing
/// left to remind.
///
/// # Errors
///
/// - `404 Not Found`: Manual trigger disabled in this process
/// - `503 Service Unavailable`: Record store unreachable while loading candidates

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::ApiResponse,
};
use advocate_shared::auth::AuthContext;
use advocate_worker::sweep::{SweepError, SweepSummary, SweepTrigger};
use axum::{extract::State, Extension, Json};

pub async fn run_reminders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ApiResponse<SweepSummary>>> {
    let sweep = match (&state.sweep, state.config.manual_trigger_enabled) {
        (Some(sweep), true) => sweep.clone(),
        _ => return Err(ApiError::NotFound("Manual reminder trigger is disabled".to_string())),
    };

    tracing::info!(user_id = %auth.user_id, "Manual reminder sweep requested");

    let summary = sweep.run(SweepTrigger::Manual).await.map_err(|e| match e {
        SweepError::Store(store) => ApiError::from(store),
    })?;

    Ok(Json(
        ApiResponse::ok(summary).with_message("Reminder sweep completed"),
    ))
}
