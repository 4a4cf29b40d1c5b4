/// Request authentication
///
/// [`authenticate`] turns a bearer token into an [`AuthContext`]: the token is
/// verified by the identity provider, the user record is found or created,
/// and disabled accounts and revoked sessions are refused.
///
/// The API layer inserts the resulting context into request extensions;
/// handlers take it as an extractor.
///
/// # Example
///
/// ```
/// use advocate_shared::auth::middleware::AuthContext;
///
/// async fn handler(auth: AuthContext) -> String {
///     format!("Hello, {}!", auth.user.display_name)
/// }
/// ```

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::identity::{IdentityError, IdentityProvider};
use crate::models::User;
use crate::store::{StoreError, UserStore};

/// Authenticated caller, added to request extensions
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Caller's stable identifier; every store access is scoped by it
    pub user_id: String,

    /// The caller's user record as of this request
    pub user: User,
}

/// Authentication failures
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization` header
    #[error("Missing credentials")]
    MissingCredentials,

    /// Header present but not `Bearer <token>`
    #[error("{0}")]
    InvalidFormat(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// The user record could not be loaded
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Machine-readable code for identity failures
    pub fn code(&self) -> Option<&'static str> {
        match self {
            AuthError::MissingCredentials => Some("NO_TOKEN"),
            AuthError::InvalidFormat(_) => Some("INVALID_TOKEN"),
            AuthError::Identity(e) => Some(e.code()),
            AuthError::Store(_) => None,
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthError::InvalidFormat("Invalid authorization header".to_string()))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }
    Ok(token)
}

/// Verifies `token` and resolves the caller
///
/// # Errors
///
/// - identity failures from the provider
/// - [`IdentityError::UserDisabled`] for inactive accounts
/// - [`IdentityError::Revoked`] when the session started before the user's
///   revocation watermark
/// - store failures while loading the user
pub async fn authenticate<U>(
    identity: &dyn IdentityProvider,
    users: &U,
    token: &str,
    now: DateTime<Utc>,
) -> Result<AuthContext, AuthError>
where
    U: UserStore + ?Sized,
{
    let verified = identity.verify(token).await.map_err(|e| {
        debug!(provider = identity.name(), code = e.code(), "Token verification failed");
        e
    })?;

    let user = users.find_or_create_user(verified.profile(), now).await?;

    if !user.is_active {
        warn!(user_id = %user.uid, "Disabled user attempted to authenticate");
        return Err(IdentityError::UserDisabled.into());
    }

    if let Some(valid_after) = user.tokens_valid_after {
        if verified.session_started_at() < valid_after {
            debug!(user_id = %user.uid, "Token issued before revocation");
            return Err(IdentityError::Revoked.into());
        }
    }

    Ok(AuthContext {
        user_id: user.uid.clone(),
        user,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "Missing credentials"))
    }
}
