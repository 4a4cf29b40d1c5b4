/// Mock push gateway for tests and local development
///
/// Records every send instead of talking to a push service. Individual
/// tokens can be scripted to fail:
///
/// - [`MockGateway::invalidate`]: the token answers `InvalidToken`
/// - [`MockGateway::fail`]: the token answers `Unavailable`
///
/// Clones share the same record and script, so a test can keep one clone and
/// hand another to the sweep.
///
/// # Example
///
/// ```
/// use advocate_worker::push::{MockGateway, PushGateway, PushMessage};
/// use std::collections::BTreeMap;
///
/// # async fn example() {
/// let gateway = MockGateway::new();
/// gateway.invalidate("stale-token");
///
/// let message = PushMessage {
///     title: "t".into(),
///     body: "b".into(),
///     data: BTreeMap::new(),
/// };
/// assert!(gateway.send("fresh-token", &message).await.is_ok());
/// assert!(gateway.send("stale-token", &message).await.is_err());
/// assert_eq!(gateway.delivered_to(), vec!["fresh-token".to_string()]);
/// # }
/// ```

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{DeliveryReceipt, PushError, PushGateway, PushMessage, PushResult};

/// A send seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub token: String,
    pub message: PushMessage,
    pub delivered: bool,
}

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<SentMessage>,
    invalid: HashSet<String>,
    failing: HashSet<String>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the record from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes `token` answer with a permanent failure
    pub fn invalidate(&self, token: &str) {
        self.state().invalid.insert(token.to_string());
    }

    /// Makes `token` answer with a transient failure
    pub fn fail(&self, token: &str) {
        self.state().failing.insert(token.to_string());
    }

    /// Delays every send by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Every send attempt so far, in order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    /// Tokens that received a message
    pub fn delivered_to(&self) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|s| s.delivered)
            .map(|s| s.token.clone())
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.state().sent.iter().filter(|s| s.delivered).count()
    }

    pub fn clear(&self) {
        self.state().sent.clear();
    }
}

#[async_trait]
impl PushGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, token: &str, message: &PushMessage) -> PushResult<DeliveryReceipt> {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        let result = if state.invalid.contains(token) {
            Err(PushError::InvalidToken("registration token is not registered".to_string()))
        } else if state.failing.contains(token) {
            Err(PushError::Unavailable("scripted failure".to_string()))
        } else {
            Ok(DeliveryReceipt {
                message_id: format!("mock-{}", state.sent.len() + 1),
                delivered_at: Utc::now(),
            })
        };

        state.sent.push(SentMessage {
            token: token.to_string(),
            message: message.clone(),
            delivered: result.is_ok(),
        });

        result
    }
}
