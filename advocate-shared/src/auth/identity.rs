/// Identity provider abstraction
///
/// An [`IdentityProvider`] turns a bearer credential into a
/// [`VerifiedIdentity`] or a typed [`IdentityError`]. Each error carries a
/// stable machine-readable code that clients use to decide whether to refresh
/// the token or sign the user out.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use std::sync::Arc;

use crate::config::{IdentityBackend, IdentityConfig};
use crate::models::UserProfile;

use super::firebase::FirebaseIdentityProvider;
use super::local::LocalIdentityProvider;

/// Identity verification failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Token has expired")]
    Expired,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Invalid token: {0}")]
    Malformed(String),

    #[error("User account is disabled")]
    UserDisabled,

    #[error("Authentication failed: {0}")]
    Unknown(String),
}

impl IdentityError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            IdentityError::Expired => "TOKEN_EXPIRED",
            IdentityError::Revoked => "TOKEN_REVOKED",
            IdentityError::Malformed(_) => "INVALID_TOKEN",
            IdentityError::UserDisabled => "USER_DISABLED",
            IdentityError::Unknown(_) => "AUTH_FAILED",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => IdentityError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => IdentityError::Malformed(err.to_string()),
            _ => IdentityError::Unknown(err.to_string()),
        }
    }
}

/// A successfully verified credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable user identifier (`sub`)
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,

    /// When the credential was issued (`iat`)
    pub issued_at: DateTime<Utc>,

    /// When the user last actually signed in (`auth_time`), if known
    pub auth_time: Option<DateTime<Utc>>,
}

impl VerifiedIdentity {
    /// Profile claims used to create or refresh the user record
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            uid: self.uid.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
            email_verified: self.email_verified,
        }
    }

    /// Instant compared against the user's revocation watermark
    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.auth_time.unwrap_or(self.issued_at)
    }
}

/// Verifies bearer credentials
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    /// Verifies `token` and returns the identity it proves
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError>;
}

/// Converts a Unix timestamp claim
pub(crate) fn timestamp(secs: i64) -> Result<DateTime<Utc>, IdentityError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| IdentityError::Malformed(format!("invalid timestamp {}", secs)))
}

/// Builds the configured identity provider
pub fn build_identity_provider(config: &IdentityConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    config.validate()?;
    match config.provider {
        IdentityBackend::Firebase => {
            let project_id = config
                .firebase_project_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("FIREBASE_PROJECT_ID is required"))?;
            Ok(Arc::new(FirebaseIdentityProvider::new(project_id)?))
        }
        IdentityBackend::Local => {
            let secret = config
                .local_jwt_secret
                .clone()
                .ok_or_else(|| anyhow::anyhow!("LOCAL_JWT_SECRET is required"))?;
            Ok(Arc::new(LocalIdentityProvider::new(secret)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IdentityError::Expired.code(), "TOKEN_EXPIRED");
        assert_eq!(IdentityError::Revoked.code(), "TOKEN_REVOKED");
        assert_eq!(IdentityError::Malformed("x".into()).code(), "INVALID_TOKEN");
        assert_eq!(IdentityError::UserDisabled.code(), "USER_DISABLED");
        assert_eq!(IdentityError::Unknown("x".into()).code(), "AUTH_FAILED");
    }

    #[test]
    fn test_session_start_prefers_auth_time() {
        let issued = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        let signed_in = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap();
        let mut identity = VerifiedIdentity {
            uid: "uid-1".to_string(),
            email: None,
            email_verified: false,
            display_name: None,
            photo_url: None,
            issued_at: issued,
            auth_time: None,
        };
        assert_eq!(identity.session_started_at(), issued);

        identity.auth_time = Some(signed_in);
        assert_eq!(identity.session_started_at(), signed_in);
    }

    #[test]
    fn test_build_local_provider() {
        let config = IdentityConfig {
            provider: IdentityBackend::Local,
            firebase_project_id: None,
            local_jwt_secret: Some("a-local-development-secret-of-32+chars".to_string()),
        };
        let provider = build_identity_provider(&config).unwrap();
        assert_eq!(provider.name(), "local");
    }
}
