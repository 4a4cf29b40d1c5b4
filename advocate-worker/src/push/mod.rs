/// Push Gateway
///
/// The contract between the reminder sweep and a push-notification service.
/// A gateway takes one device token and one [`PushMessage`] and either
/// delivers it or fails with a typed [`PushError`].
///
/// # Failure classes
///
/// - [`PushError::InvalidToken`]: the token will never work again. The sweep
///   removes it from the owner's device set.
/// - every other variant: transient. Logged, token kept.
///
/// # Gateways
///
/// - **FCM**: Firebase Cloud Messaging HTTP v1 ([`FcmGateway`])
/// - **Mock**: records sends, scriptable failures ([`MockGateway`])

pub mod fcm;
pub mod mock;

pub use fcm::FcmGateway;
pub use mock::MockGateway;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use advocate_shared::models::ReminderCandidate;

use crate::config::{PushConfig, PushProvider};

/// Notification title of case reminders
pub const REMINDER_TITLE: &str = "⚖️ Case Due Reminder";

/// Value of the `type` data key of case reminders
pub const REMINDER_TYPE: &str = "case_reminder";

/// Push delivery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The token is unregistered or malformed and will never succeed
    #[error("Device token is no longer valid: {0}")]
    InvalidToken(String),

    /// The service refused this message
    #[error("Message rejected: {0}")]
    Rejected(String),

    /// Network failure talking to the service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Gateway credentials could not be obtained
    #[error("Gateway authentication failed: {0}")]
    Auth(String),

    /// Service overloaded or down
    #[error("Push service unavailable: {0}")]
    Unavailable(String),
}

impl PushError {
    /// Whether the token should be removed
    pub fn is_permanent(&self) -> bool {
        matches!(self, PushError::InvalidToken(_))
    }
}

/// Push result type alias
pub type PushResult<T> = Result<T, PushError>;

/// Notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,

    /// String key/value pairs delivered to the client app
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    /// Reminder for a case due in `days` days
    pub fn case_reminder(case: &ReminderCandidate, days: i64) -> Self {
        let mut data = BTreeMap::new();
        data.insert("caseId".to_string(), case.id.to_string());
        data.insert("clientName".to_string(), case.client_name.clone());
        data.insert("caseTitle".to_string(), case.case_title.clone());
        data.insert(
            "dueDate".to_string(),
            case.due_date.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        data.insert("type".to_string(), REMINDER_TYPE.to_string());

        Self {
            title: REMINDER_TITLE.to_string(),
            body: format!(
                "Your case \"{}\" for {} is due in {} {}.",
                case.case_title,
                case.client_name,
                days,
                if days == 1 { "day" } else { "days" }
            ),
            data,
        }
    }
}

/// Acknowledgement of a delivered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned message identifier
    pub message_id: String,
    pub delivered_at: chrono::DateTime<Utc>,
}

/// How one send ended, from the sweep's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    InvalidTarget,
    TransientFailure,
}

impl DeliveryOutcome {
    pub fn of<T>(result: &PushResult<T>) -> Self {
        match result {
            Ok(_) => DeliveryOutcome::Delivered,
            Err(e) if e.is_permanent() => DeliveryOutcome::InvalidTarget,
            Err(_) => DeliveryOutcome::TransientFailure,
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::InvalidTarget => write!(f, "invalid_target"),
            DeliveryOutcome::TransientFailure => write!(f, "transient_failure"),
        }
    }
}

/// A push-notification service
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Gateway name for logs
    fn name(&self) -> &str;

    /// Sends `message` to the device identified by `token`
    async fn send(&self, token: &str, message: &PushMessage) -> PushResult<DeliveryReceipt>;
}

/// Builds the configured gateway
pub fn build_gateway(config: &PushConfig) -> anyhow::Result<Arc<dyn PushGateway>> {
    config.validate()?;
    match config.provider {
        PushProvider::Fcm => Ok(Arc::new(FcmGateway::from_config(config)?)),
        PushProvider::Mock => Ok(Arc::new(MockGateway::new())),
    }
}
