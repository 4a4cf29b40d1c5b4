/// Firebase Authentication ID token verification
///
/// ID tokens are RS256 JWTs signed with Google's rotating service-account
/// keys. The key set is fetched from Google's JWKS endpoint and cached for as
/// long as its `Cache-Control: max-age` allows. An unknown `kid` forces one
/// refresh before the token is rejected.
///
/// Checks performed:
/// - signature against the key named by the token's `kid`
/// - `aud` equals the project ID
/// - `iss` equals `https://securetoken.google.com/<project_id>`
/// - `exp` in the future, `sub` non-empty, `auth_time` not in the future

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::identity::{timestamp, IdentityError, IdentityProvider, VerifiedIdentity};

/// Google's JWKS for Firebase ID tokens
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Used when the key response carries no usable `max-age`
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// Claims of a Firebase ID token
#[derive(Debug, Clone, Deserialize)]
struct FirebaseClaims {
    sub: String,
    iat: i64,
    #[serde(default)]
    auth_time: Option<i64>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

#[derive(Debug)]
struct CachedKeys {
    keys: JwkSet,
    expires_at: Instant,
}

/// Verifies Firebase Authentication ID tokens
#[derive(Debug)]
pub struct FirebaseIdentityProvider {
    project_id: String,
    jwks_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl FirebaseIdentityProvider {
    pub fn new(project_id: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_jwks_url(project_id, FIREBASE_JWKS_URL)
    }

    /// Provider that fetches keys from `jwks_url`
    pub fn with_jwks_url(
        project_id: impl Into<String>,
        jwks_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            project_id: project_id.into(),
            jwks_url: jwks_url.into(),
            http,
            cache: RwLock::new(None),
        })
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.project_id.as_str()]);
        validation.set_issuer(&[self.issuer()]);
        validation.validate_exp = true;
        validation
    }

    async fn fetch_keys(&self) -> Result<CachedKeys, IdentityError> {
        debug!(url = %self.jwks_url, "Fetching identity provider signing keys");

        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IdentityError::Unknown(format!("key fetch failed: {}", e)))?;

        let ttl = response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_KEY_TTL);

        let keys = response
            .json::<JwkSet>()
            .await
            .map_err(|e| IdentityError::Unknown(format!("invalid key set: {}", e)))?;

        Ok(CachedKeys {
            keys,
            expires_at: Instant::now() + ttl,
        })
    }

    /// Decoding key for `kid`, refreshing the cache when stale or missing it
    async fn key_for(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.expires_at > Instant::now()) {
                if let Some(jwk) = cached.keys.find(kid) {
                    return DecodingKey::from_jwk(jwk).map_err(IdentityError::from);
                }
            }
        }

        let fresh = self.fetch_keys().await?;
        let key = fresh
            .keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()?;
        *self.cache.write().await = Some(fresh);

        key.ok_or_else(|| {
            warn!(kid = %kid, "Token signed with unknown key");
            IdentityError::Malformed(format!("unknown signing key {}", kid))
        })
    }
}

/// Extracts `max-age` from a `Cache-Control` header value
fn max_age(header: &str) -> Option<Duration> {
    header
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    fn name(&self) -> &'static str {
        "firebase"
    }

    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, IdentityError> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(IdentityError::Malformed(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::Malformed("missing key id".to_string()))?;

        let key = self.key_for(&kid).await?;
        let claims = decode::<FirebaseClaims>(token, &key, &self.validation())?.claims;

        if claims.sub.trim().is_empty() {
            return Err(IdentityError::Malformed("missing subject".to_string()));
        }
        let auth_time = claims.auth_time.map(timestamp).transpose()?;
        if auth_time.is_some_and(|t| t > Utc::now() + chrono::Duration::minutes(1)) {
            return Err(IdentityError::Malformed("auth_time is in the future".to_string()));
        }

        Ok(VerifiedIdentity {
            uid: claims.sub,
            email: claims.email,
            email_verified: claims.email_verified,
            display_name: claims.name,
            photo_url: claims.picture,
            issued_at: timestamp(claims.iat)?,
            auth_time,
        })
    }
}
