/// Authentication middleware layer
///
/// Extracts the bearer token, verifies it through the configured identity
/// provider, finds or creates the caller's user record and injects the
/// resulting `AuthContext` into request extensions.

use crate::{app::AppState, error::ApiError};
use advocate_shared::auth::{authenticate, bearer_token};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

pub async fn auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;

    let auth_context = authenticate(
        state.identity.as_ref(),
        state.store.as_ref(),
        token,
        state.clock.now(),
    )
    .await?;

    tracing::debug!(user_id = %auth_context.user_id, "Request authenticated");
    req.extensions_mut().insert(auth_context);

    Ok(next.run(req).await)
}
