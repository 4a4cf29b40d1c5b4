/// Local HS256 identity provider
///
/// Issues and verifies HMAC-SHA256 signed tokens with a shared secret. Meant
/// for development and tests where a Firebase project is not available; the
/// claims mirror the Firebase ID token so the rest of the system cannot tell
/// the difference.
///
/// # Security
///
/// - **Algorithm**: HS256
/// - **Secret**: at least 32 bytes, from `LOCAL_JWT_SECRET`
/// - **Validation**: signature, expiration, issuer and audience
///
/// # Example
///
/// ```
/// use advocate_shared::auth::identity::IdentityProvider;
/// use advocate_shared::auth::local::{LocalClaims, LocalIdentityProvider};
/// use chrono::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = LocalIdentityProvider::new("a-local-development-secret-of-32+chars");
/// let token = provider.issue_token(&LocalClaims::new("uid-1", Duration::hours(1)))?;
///
/// let identity = provider.verify(&token).await?;
/// assert_eq!(identity.uid, "uid-1");
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::identity::{timestamp, IdentityError, IdentityProvider, VerifiedIdentity};

/// Issuer and audience of locally issued tokens
pub const LOCAL_ISSUER: &str = "advocate-local";

/// Claims of a locally issued token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalClaims {
    /// Subject - user identifier
    pub sub: String,

    pub iss: String,

    pub aud: String,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Sign-in time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub email_verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl LocalClaims {
    /// Claims for `uid` valid for `expires_in` from now
    ///
    /// Timestamps come from the system clock because signature validation
    /// checks `exp` against it.
    pub fn new(uid: impl Into<String>, expires_in: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: uid.into(),
            iss: LOCAL_ISSUER.to_string(),
            aud: LOCAL_ISSUER.to_string(),
            iat: now.timestamp(),
            exp: (now + expires_in).timestamp(),
            auth_time: Some(now.timestamp()),
            email: None,
            email_verified: false,
            name: None,
            picture: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self.email_verified = true;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Backdates issue and sign-in time by `by`
    pub fn issued_earlier(mut self, by: Duration) -> Self {
        self.iat -= by.num_seconds();
        self.auth_time = self.auth_time.map(|t| t - by.num_seconds());
        self
    }
}

/// HS256 identity provider with a shared secret
#[derive(Clone)]
pub struct LocalIdentityProvider {
    secret: String,
}

impl std::fmt::Debug for LocalIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentityProvider").finish_non_exhaustive()
    }
}

impl LocalIdentityProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Signs `claims` into a token
    pub fn issue_token(&self, claims: &LocalClaims) -> Result<String, IdentityError> {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(self.secret.as_bytes());

        encode(&header, claims, &key)
            .map_err(|e| IdentityError::Unknown(format!("Token encoding failed: {}", e)))
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[LOCAL_ISSUER]);
        validation.set_audience(&[LOCAL_ISSUER]);
        validation.validate_exp = true;
        validation
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let claims = decode::<LocalClaims>(token, &key, &Self::validation())?.claims;

        if claims.sub.trim().is_empty() {
            return Err(IdentityError::Malformed("missing subject".to_string()));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            display_name: claims.name,
            photo_url: claims.picture,
            issued_at: timestamp(claims.iat)?,
            auth_time: claims.auth_time.map(timestamp).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    #[tokio::test]
    async fn test_issue_and_verify() {
        let provider = LocalIdentityProvider::new(SECRET);
        let claims = LocalClaims::new("uid-42", Duration::hours(1))
            .with_email("adv@example.com")
            .with_name("Adv. Rao");
        let token = provider.issue_token(&claims).unwrap();

        let identity = provider.verify(&token).await.unwrap();
        assert_eq!(identity.uid, "uid-42");
        assert_eq!(identity.email.as_deref(), Some("adv@example.com"));
        assert!(identity.email_verified);
        assert_eq!(identity.display_name.as_deref(), Some("Adv. Rao"));
        assert!(identity.auth_time.is_some());
    }

    #[tokio::test]
    async fn test_expired_token() {
        let provider = LocalIdentityProvider::new(SECRET);
        // Past the default 60s leeway
        let claims = LocalClaims::new("uid-42", Duration::minutes(-5));
        let token = provider.issue_token(&claims).unwrap();

        assert_eq!(provider.verify(&token).await, Err(IdentityError::Expired));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_malformed() {
        let issuer = LocalIdentityProvider::new(SECRET);
        let verifier = LocalIdentityProvider::new("another-secret-key-at-least-32-bytes!!");
        let token = issuer
            .issue_token(&LocalClaims::new("uid-42", Duration::hours(1)))
            .unwrap();

        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let provider = LocalIdentityProvider::new(SECRET);
        let err = provider.verify("not-a-jwt").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_wrong_issuer_rejected() {
        let provider = LocalIdentityProvider::new(SECRET);
        let mut claims = LocalClaims::new("uid-42", Duration::hours(1));
        claims.iss = "someone-else".to_string();
        let token = provider.issue_token(&claims).unwrap();

        assert!(matches!(
            provider.verify(&token).await,
            Err(IdentityError::Malformed(_))
        ));
    }

    #[test]
    fn test_issued_earlier() {
        let claims = LocalClaims::new("uid-42", Duration::hours(1));
        let iat = claims.iat;
        let older = claims.issued_earlier(Duration::hours(2));
        assert_eq!(older.iat, iat - 7200);
        assert_eq!(older.auth_time, Some(iat - 7200));
    }
}
