/// Firebase Cloud Messaging gateway (HTTP v1 API)
///
/// Authenticates as a Google service account: a short-lived RS256 assertion
/// signed with the account's private key is exchanged for an OAuth2 access
/// token, which is cached until a minute before it expires.
///
/// # Error mapping
///
/// | FCM answer                                            | [`PushError`]  |
/// |-------------------------------------------------------|----------------|
/// | FcmError `errorCode` `UNREGISTERED`/`INVALID_ARGUMENT` | `InvalidToken` |
/// | HTTP 401 / 403                                        | `Auth`         |
/// | HTTP 429, 5xx                                         | `Unavailable`  |
/// | anything else, including a bare 404                   | `Rejected`     |

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use advocate_shared::models::token_fingerprint;

use super::{DeliveryReceipt, PushError, PushGateway, PushMessage, PushResult};
use crate::config::PushConfig;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const FCM_BASE_URL: &str = "https://fcm.googleapis.com";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Lifetime requested for service-account assertions
const ASSERTION_TTL_SECS: i64 = 3600;

/// Access tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

pub struct FcmGateway {
    project_id: String,
    client_email: String,
    signing_key: EncodingKey,
    base_url: String,
    token_url: String,
    http: reqwest::Client,
    access_token: Mutex<Option<AccessToken>>,
}

impl std::fmt::Debug for FcmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmGateway")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

impl FcmGateway {
    /// Gateway for a service account, using Google's production endpoints
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key_pem: &str,
    ) -> anyhow::Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("FIREBASE_PRIVATE_KEY is not a valid RSA key: {}", e))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self {
            project_id: project_id.into(),
            client_email: client_email.into(),
            signing_key,
            base_url: FCM_BASE_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            http,
            access_token: Mutex::new(None),
        })
    }

    pub fn from_config(config: &PushConfig) -> anyhow::Result<Self> {
        let missing = |key: &str| anyhow::anyhow!("{} is required for the FCM gateway", key);
        Self::new(
            config.project_id.clone().ok_or_else(|| missing("FIREBASE_PROJECT_ID"))?,
            config.client_email.clone().ok_or_else(|| missing("FIREBASE_CLIENT_EMAIL"))?,
            config.private_key.as_deref().ok_or_else(|| missing("FIREBASE_PRIVATE_KEY"))?,
        )
    }

    /// Points the gateway at other endpoints
    pub fn with_endpoints(mut self, base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self.token_url = token_url.into();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/v1/projects/{}/messages:send", self.base_url, self.project_id)
    }

    fn assertion(&self) -> PushResult<String> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.token_url,
            iat,
            exp: iat + ASSERTION_TTL_SECS,
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| PushError::Auth(format!("assertion signing failed: {}", e)))
    }

    /// Current OAuth2 access token, exchanging a fresh assertion when needed
    async fn access_token(&self) -> PushResult<String> {
        let mut cached = self.access_token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.refresh_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        debug!(client_email = %self.client_email, "Exchanging service account assertion");
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushError::Auth(format!("token exchange returned {}: {}", status, body)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PushError::Auth(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn forget_access_token(&self) {
        *self.access_token.lock().await = None;
    }
}

/// Request body for `messages:send`
fn message_body(token: &str, message: &PushMessage) -> JsonValue {
    json!({
        "message": {
            "token": token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
            "android": { "priority": "high" },
            "apns": { "payload": { "aps": { "sound": "default" } } },
        }
    })
}

/// Maps an FCM error response to a [`PushError`]
fn classify_error(status: StatusCode, body: &str) -> PushError {
    let parsed: Option<JsonValue> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(JsonValue::as_str)
        .unwrap_or(body)
        .to_string();

    let fcm_code = error
        .and_then(|e| e.get("details"))
        .and_then(JsonValue::as_array)
        .and_then(|details| {
            details
                .iter()
                .find_map(|d| d.get("errorCode").and_then(JsonValue::as_str))
        });

    // Only an FcmError detail speaks for the token; the rpc status alone does not
    match (status, fcm_code) {
        (_, Some("UNREGISTERED")) | (_, Some("INVALID_ARGUMENT")) => PushError::InvalidToken(message),
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => PushError::Auth(message),
        (StatusCode::TOO_MANY_REQUESTS, _) => PushError::Unavailable(message),
        (s, _) if s.is_server_error() => PushError::Unavailable(message),
        _ => PushError::Rejected(message),
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn send(&self, token: &str, message: &PushMessage) -> PushResult<DeliveryReceipt> {
        let access_token = self.access_token().await?;

        let response = self
            .http
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&message_body(token, message))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let sent: SendResponse = response
                .json()
                .await
                .map_err(|e| PushError::Transport(format!("invalid send response: {}", e)))?;
            return Ok(DeliveryReceipt {
                message_id: sent.name,
                delivered_at: Utc::now(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let err = classify_error(status, &body);
        if status == StatusCode::UNAUTHORIZED {
            self.forget_access_token().await;
        }
        warn!(
            device = %token_fingerprint(token),
            status = status.as_u16(),
            error = %err,
            "FCM send failed"
        );
        Err(err)
    }
}
