/// In-memory Record Store
///
/// Holds cases and users in hash maps behind a single `tokio::sync::RwLock`.
/// Writes take the lock exclusively, so the conditional reminder mark is as
/// atomic here as the single-row `UPDATE` in PostgreSQL.
///
/// Used by the test suites and by local runs with `STORE_BACKEND=memory`.
/// Nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CaseStore, RecordStore, StoreError, StoreResult, UserStore};
use crate::calendar::DayWindow;
use crate::models::{
    Case, CaseFilter, CasePatch, CaseStats, NewCase, ReminderCandidate, StatsBounds, User,
    UserPreferences, UserProfile,
};

#[derive(Debug, Default)]
struct Inner {
    cases: HashMap<Uuid, Case>,
    users: HashMap<String, User>,
}

/// Record Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`]
    ///
    /// Lets tests exercise the "store unreachable" paths.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Inserts a case as-is, bypassing validation
    ///
    /// Lets tests seed cases with past due dates or a sent reminder.
    pub async fn put_case(&self, case: Case) {
        self.inner.write().await.cases.insert(case.id, case);
    }

    /// Number of stored cases across all owners
    pub async fn case_count(&self) -> usize {
        self.inner.read().await.cases.len()
    }

    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

fn owned<'a>(cases: &'a HashMap<Uuid, Case>, owner: &'a str) -> impl Iterator<Item = &'a Case> {
    cases.values().filter(move |c| c.user_id == owner)
}

fn sorted_by_due(mut cases: Vec<Case>) -> Vec<Case> {
    cases.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.created_at.cmp(&b.created_at)));
    cases
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn insert_case(&self, data: NewCase, now: DateTime<Utc>) -> StoreResult<Case> {
        self.check()?;
        let case = Case::from_new(Uuid::new_v4(), data, now);
        self.inner.write().await.cases.insert(case.id, case.clone());
        Ok(case)
    }

    async fn find_case(&self, id: Uuid, owner: &str) -> StoreResult<Option<Case>> {
        self.check()?;
        let inner = self.inner.read().await;
        Ok(inner.cases.get(&id).filter(|c| c.is_owned_by(owner)).cloned())
    }

    async fn list_cases(&self, owner: &str, filter: CaseFilter) -> StoreResult<Vec<Case>> {
        self.check()?;
        let inner = self.inner.read().await;
        let cases = owned(&inner.cases, owner)
            .filter(|c| filter.completed.map_or(true, |done| c.completed == done))
            .cloned()
            .collect();
        Ok(sorted_by_due(cases))
    }

    async fn update_case(
        &self,
        id: Uuid,
        owner: &str,
        patch: CasePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.cases.get_mut(&id).filter(|c| c.is_owned_by(owner)) {
            Some(case) => {
                case.apply_patch(patch, now);
                Ok(Some(case.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_case(&self, id: Uuid, owner: &str) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        let owned_by_caller = inner.cases.get(&id).is_some_and(|c| c.is_owned_by(owner));
        if owned_by_caller {
            inner.cases.remove(&id);
        }
        Ok(owned_by_caller)
    }

    async fn search_cases(&self, owner: &str, term: &str) -> StoreResult<Vec<Case>> {
        self.check()?;
        let needle = term.trim().to_lowercase();
        let inner = self.inner.read().await;
        let cases = owned(&inner.cases, owner)
            .filter(|c| {
                c.client_name.to_lowercase().contains(&needle)
                    || c.case_title.to_lowercase().contains(&needle)
                    || c.case_number.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        Ok(sorted_by_due(cases))
    }

    async fn cases_due_between(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Case>> {
        self.check()?;
        let inner = self.inner.read().await;
        let cases = owned(&inner.cases, owner)
            .filter(|c| !c.completed && c.due_date >= start && c.due_date <= end)
            .cloned()
            .collect();
        Ok(sorted_by_due(cases))
    }

    async fn overdue_cases(&self, owner: &str, before: DateTime<Utc>) -> StoreResult<Vec<Case>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut cases = owned(&inner.cases, owner)
            .filter(|c| !c.completed && c.due_date < before)
            .cloned()
            .collect::<Vec<_>>();
        cases.sort_by(|a, b| b.due_date.cmp(&a.due_date));
        Ok(cases)
    }

    async fn case_stats(&self, owner: &str, bounds: StatsBounds) -> StoreResult<CaseStats> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut stats = CaseStats::default();
        for case in owned(&inner.cases, owner) {
            stats.total_cases += 1;
            if case.completed {
                stats.completed_cases += 1;
            } else if case.due_date < bounds.today_start {
                stats.overdue_cases += 1;
            }
            if case.due_date >= bounds.today_start && case.due_date < bounds.tomorrow_start {
                stats.due_today_cases += 1;
            }
            if case.due_date >= bounds.today_start && case.due_date <= bounds.upcoming_end {
                stats.upcoming_cases += 1;
            }
            if case.reminder_sent {
                stats.reminders_sent += 1;
            }
        }
        Ok(stats)
    }

    async fn cases_needing_reminder(
        &self,
        window: &DayWindow,
    ) -> StoreResult<Vec<ReminderCandidate>> {
        self.check()?;
        let inner = self.inner.read().await;
        let mut candidates = inner
            .cases
            .values()
            .filter(|c| !c.reminder_sent && !c.completed && window.contains(c.due_date))
            .map(ReminderCandidate::from)
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
        Ok(candidates)
    }

    async fn mark_reminder_sent(
        &self,
        id: Uuid,
        due_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.cases.get_mut(&id) {
            Some(case) if !case.reminder_sent && case.due_date == due_date => {
                case.reminder_sent = true;
                case.reminder_sent_at = Some(at);
                case.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_reminder(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>> {
        self.check()?;
        let mut inner = self.inner.write().await;
        match inner.cases.get_mut(&id).filter(|c| c.is_owned_by(owner)) {
            Some(case) => {
                case.reset_reminder();
                case.updated_at = now;
                Ok(Some(case.clone()))
            }
            None => Ok(None),
        }
    }
}

impl MemoryStore {
    async fn modify_user<F>(&self, uid: &str, f: F) -> StoreResult<Option<User>>
    where
        F: FnOnce(&mut User) + Send,
    {
        self.check()?;
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(uid).map(|user| {
            f(user);
            user.clone()
        }))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, uid: &str) -> StoreResult<Option<User>> {
        self.check()?;
        Ok(self.inner.read().await.users.get(uid).cloned())
    }

    async fn find_or_create_user(
        &self,
        profile: UserProfile,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        self.check()?;
        let mut inner = self.inner.write().await;
        if let Some(user) = inner.users.get_mut(&profile.uid) {
            user.refresh_profile(&profile, at);
            return Ok(user.clone());
        }
        let user = User::from_profile(profile, at);
        inner.users.insert(user.uid.clone(), user.clone());
        Ok(user)
    }

    async fn update_preferences(
        &self,
        uid: &str,
        prefs: UserPreferences,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        self.modify_user(uid, |user| user.apply_preferences(prefs, at)).await
    }

    async fn add_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        self.modify_user(uid, |user| {
            if user.add_device_token(token) {
                user.updated_at = at;
            }
        })
        .await
    }

    async fn remove_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let tokens = [token.to_string()];
        self.modify_user(uid, |user| {
            if user.remove_device_tokens(&tokens) > 0 {
                user.updated_at = at;
            }
        })
        .await
    }

    async fn remove_device_tokens(&self, uid: &str, tokens: &[String]) -> StoreResult<usize> {
        self.check()?;
        if tokens.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.write().await;
        Ok(inner
            .users
            .get_mut(uid)
            .map_or(0, |user| user.remove_device_tokens(tokens)))
    }

    async fn clear_device_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>> {
        self.modify_user(uid, |user| {
            user.device_tokens.clear();
            user.updated_at = at;
        })
        .await
    }

    async fn set_user_active(
        &self,
        uid: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        self.modify_user(uid, |user| {
            user.is_active = active;
            user.updated_at = at;
        })
        .await
    }

    async fn revoke_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>> {
        self.modify_user(uid, |user| {
            user.tokens_valid_after = Some(at);
            user.updated_at = at;
        })
        .await
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()
    }
}
