/// Record Store
///
/// Persistence for cases and users behind object-safe traits, so the API, the
/// reminder sweep and the tests share one contract regardless of backend.
///
/// # Backends
///
/// - [`PgStore`]: PostgreSQL through `sqlx`
/// - [`MemoryStore`]: in-process maps behind a `tokio::sync::RwLock`
///
/// Every case operation that takes an `owner` is scoped to that owner: a case
/// that exists but belongs to someone else behaves exactly like a missing one.
///
/// # Example
///
/// ```
/// use advocate_shared::store::{MemoryStore, RecordStore};
/// use std::sync::Arc;
///
/// # async fn example() -> advocate_shared::store::StoreResult<()> {
/// let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
/// store.ping().await?;
/// # Ok(())
/// # }
/// ```

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::calendar::DayWindow;
use crate::config::{StoreBackend, StoreConfig};
use crate::db::{migrations::run_migrations, pool::create_pool};
use crate::models::{
    Case, CaseFilter, CasePatch, CaseStats, NewCase, ReminderCandidate, StatsBounds, User,
    UserPreferences, UserProfile,
};

/// Record Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached (pool exhausted, connection refused)
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a model
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Case persistence
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Stores a new case and returns it with its generated id
    async fn insert_case(&self, data: NewCase, now: DateTime<Utc>) -> StoreResult<Case>;

    /// Finds one of `owner`'s cases
    async fn find_case(&self, id: Uuid, owner: &str) -> StoreResult<Option<Case>>;

    /// Lists `owner`'s cases ordered by due date (earliest first)
    async fn list_cases(&self, owner: &str, filter: CaseFilter) -> StoreResult<Vec<Case>>;

    /// Applies a partial update, returning the updated case
    async fn update_case(
        &self,
        id: Uuid,
        owner: &str,
        patch: CasePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>>;

    /// Deletes a case, returning whether anything was removed
    async fn delete_case(&self, id: Uuid, owner: &str) -> StoreResult<bool>;

    /// Case-insensitive substring search over client name, title and case number
    ///
    /// `term` must be non-blank; callers validate it.
    async fn search_cases(&self, owner: &str, term: &str) -> StoreResult<Vec<Case>>;

    /// Open cases with a due date in `[start, end]`, earliest first
    async fn cases_due_between(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Case>>;

    /// Open cases due strictly before `before`, most recent first
    async fn overdue_cases(&self, owner: &str, before: DateTime<Utc>) -> StoreResult<Vec<Case>>;

    /// Counters for the dashboard
    async fn case_stats(&self, owner: &str, bounds: StatsBounds) -> StoreResult<CaseStats>;

    /// Open, unreminded cases of every owner due inside `window`
    async fn cases_needing_reminder(
        &self,
        window: &DayWindow,
    ) -> StoreResult<Vec<ReminderCandidate>>;

    /// Marks the reminder as sent if it is still unsent for `due_date`
    ///
    /// Returns true only for the caller whose write flipped the flag.
    async fn mark_reminder_sent(
        &self,
        id: Uuid,
        due_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Clears the reminder flags of one of `owner`'s cases
    async fn reset_reminder(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>>;
}

/// User persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, uid: &str) -> StoreResult<Option<User>>;

    /// Returns the user for `profile.uid`, creating it on first contact
    ///
    /// Existing users get their sign-in fields refreshed.
    async fn find_or_create_user(&self, profile: UserProfile, at: DateTime<Utc>)
        -> StoreResult<User>;

    async fn update_preferences(
        &self,
        uid: &str,
        prefs: UserPreferences,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Registers a device token; registering it again is a no-op
    async fn add_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    async fn remove_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Removes every listed token in a single update, returning how many went
    async fn remove_device_tokens(&self, uid: &str, tokens: &[String]) -> StoreResult<usize>;

    async fn clear_device_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>>;

    /// Enables or disables an account
    async fn set_user_active(
        &self,
        uid: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    /// Revokes every credential issued before `at`
    async fn revoke_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>>;
}

/// Everything the services need from persistence
#[async_trait]
pub trait RecordStore: CaseStore + UserStore {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Round-trips to the backend
    async fn ping(&self) -> StoreResult<()>;
}

/// Builds the configured store
///
/// The PostgreSQL backend connects, health-checks and migrates before
/// returning.
pub async fn connect_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn RecordStore>> {
    match config.backend {
        StoreBackend::Postgres => {
            let pool = create_pool(config.database.clone()).await?;
            run_migrations(&pool).await?;
            info!("Using PostgreSQL record store");
            Ok(Arc::new(PgStore::new(pool)))
        }
        StoreBackend::Memory => {
            info!("Using in-memory record store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Escapes `%`, `_` and `\` for use inside an `ILIKE` pattern
pub(crate) fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}
