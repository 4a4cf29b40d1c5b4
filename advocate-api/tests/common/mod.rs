/// Common test utilities for integration tests
///
/// This module provides shared infrastructure for integration tests:
/// - In-memory record store and mock push gateway
/// - A frozen clock at 09:00 IST on 2026-03-10
/// - Locally signed identity tokens
/// - Request helpers returning status and JSON body

use advocate_api::app::{build_router, AppState};
use advocate_api::config::{Config, RateLimitConfig};
use advocate_shared::auth::local::{LocalClaims, LocalIdentityProvider};
use advocate_shared::calendar::{Clock, FixedClock};
use advocate_shared::config::{IdentityBackend, IdentityConfig, StoreConfig};
use advocate_shared::store::{MemoryStore, RecordStore};
use advocate_worker::config::{PushConfig, ReminderConfig};
use advocate_worker::push::MockGateway;
use advocate_worker::sweep::ReminderSweep;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tower::Service as _;

pub const SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// 09:00 in Asia/Kolkata on 2026-03-10
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 3, 30, 0).unwrap()
}

/// Test context containing all necessary resources
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub gateway: MockGateway,
    pub clock: FixedClock,
    pub identity: LocalIdentityProvider,
    pub app: axum::Router,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let gateway = MockGateway::new();
        let clock = FixedClock::new(test_now());
        let identity = LocalIdentityProvider::new(SECRET);

        let record_store: Arc<dyn RecordStore> = store.clone();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        let sweep = ReminderSweep::new(
            record_store.clone(),
            Arc::new(gateway.clone()),
            shared_clock.clone(),
            &config.reminder,
        )
        .unwrap();

        let state = AppState::new(
            config,
            record_store,
            Arc::new(identity.clone()),
            shared_clock,
        )
        .unwrap()
        .with_sweep(Arc::new(sweep));

        Self {
            store,
            gateway,
            clock,
            identity,
            app: build_router(state),
        }
    }

    /// Fresh token for `uid`
    pub fn token_for(&self, uid: &str) -> String {
        self.identity
            .issue_token(&LocalClaims::new(uid, Duration::hours(1)).with_email(format!("{}@example.com", uid)))
            .unwrap()
    }

    /// Returns authorization header value
    pub fn auth_header(&self, uid: &str) -> String {
        format!("Bearer {}", self.token_for(uid))
    }

    /// Sends a request and returns status and parsed JSON body
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let response = self.send_raw(method, uri, auth, body).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                panic!("Non-JSON body ({}): {}", status, String::from_utf8_lossy(&bytes))
            })
        };
        (status, json)
    }

    pub async fn send_raw(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(uid) = auth {
            builder = builder.header("authorization", self.auth_header(uid));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.app.clone().call(builder.body(body).unwrap()).await.unwrap()
    }

    /// Creates a case for `uid` and returns its id
    pub async fn create_case(&self, uid: &str, due_date: &str) -> String {
        let (status, body) = self
            .send("POST", "/api/cases", Some(uid), Some(case_body("Sharma v. State", due_date)))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }
}

/// Configuration with local identity, memory store and mock push
pub fn test_config() -> Config {
    Config {
        store: StoreConfig::memory(),
        identity: IdentityConfig {
            provider: IdentityBackend::Local,
            firebase_project_id: None,
            local_jwt_secret: Some(SECRET.to_string()),
        },
        rate_limit: RateLimitConfig::default(),
        reminder: ReminderConfig::default(),
        push: PushConfig::mock(),
        scheduler_enabled: false,
        manual_trigger_enabled: true,
        ..Default::default()
    }
}

/// A valid create-case body
pub fn case_body(title: &str, due_date: &str) -> serde_json::Value {
    serde_json::json!({
        "clientName": "R. Sharma",
        "caseTitle": title,
        "description": "Bail hearing before the sessions court",
        "dueDate": due_date,
        "priority": "high",
        "caseNumber": "BA-114/2026",
        "tags": ["Criminal", "bail"]
    })
}
