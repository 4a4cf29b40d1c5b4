/// PostgreSQL Record Store
///
/// Queries are plain `sqlx::query_as` calls with explicit column lists. Case
/// updates read the row `FOR UPDATE` inside a transaction, apply the patch in
/// Rust ([`Case::apply_patch`]) and write every mutable column back, so the
/// reminder-reset rule lives in one place for both backends.
///
/// The reminder mark is a single conditional `UPDATE`: it only matches while
/// `reminder_sent` is still false and the due date is the one the sweep saw.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::{like_pattern, CaseStore, RecordStore, StoreError, StoreResult, UserStore};
use crate::calendar::DayWindow;
use crate::db::pool::health_check;
use crate::models::{
    Attachment, Case, CaseFilter, CasePatch, CaseStats, NewCase, ReminderCandidate, StatsBounds,
    User, UserPreferences, UserProfile,
};

const CASE_COLUMNS: &str = "id, user_id, client_name, case_title, description, due_date, \
     reminder_sent, reminder_sent_at, completed, completed_at, priority, status, notes, court, \
     case_number, attachments, tags, created_at, updated_at";

const USER_COLUMNS: &str = "uid, email, display_name, photo_url, device_tokens, \
     notifications_enabled, email_notifications_enabled, is_active, email_verified, \
     tokens_valid_after, last_login_at, created_at, updated_at";

/// Raw `cases` row; enums are stored as text
#[derive(Debug, sqlx::FromRow)]
struct CaseRow {
    id: Uuid,
    user_id: String,
    client_name: String,
    case_title: String,
    description: String,
    due_date: DateTime<Utc>,
    reminder_sent: bool,
    reminder_sent_at: Option<DateTime<Utc>>,
    completed: bool,
    completed_at: Option<DateTime<Utc>>,
    priority: String,
    status: String,
    notes: String,
    court: String,
    case_number: String,
    attachments: Json<Vec<Attachment>>,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CaseRow> for Case {
    type Error = StoreError;

    fn try_from(row: CaseRow) -> Result<Self, Self::Error> {
        let priority = row
            .priority
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("case {}: {}", row.id, e)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("case {}: {}", row.id, e)))?;

        Ok(Case {
            id: row.id,
            user_id: row.user_id,
            client_name: row.client_name,
            case_title: row.case_title,
            description: row.description,
            due_date: row.due_date,
            reminder_sent: row.reminder_sent,
            reminder_sent_at: row.reminder_sent_at,
            completed: row.completed,
            completed_at: row.completed_at,
            priority,
            status,
            notes: row.notes,
            court: row.court,
            case_number: row.case_number,
            attachments: row.attachments.0,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_cases(rows: Vec<CaseRow>) -> StoreResult<Vec<Case>> {
    rows.into_iter().map(Case::try_from).collect()
}

/// Record Store backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool; migrations must already be applied
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_cases(&self, sql: &str, owner: &str) -> StoreResult<Vec<Case>> {
        let rows = sqlx::query_as::<_, CaseRow>(sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        into_cases(rows)
    }
}

#[async_trait]
impl CaseStore for PgStore {
    async fn insert_case(&self, data: NewCase, now: DateTime<Utc>) -> StoreResult<Case> {
        let case = Case::from_new(Uuid::new_v4(), data, now);
        let sql = format!(
            "INSERT INTO cases ({CASE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             RETURNING {CASE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(case.id)
            .bind(&case.user_id)
            .bind(&case.client_name)
            .bind(&case.case_title)
            .bind(&case.description)
            .bind(case.due_date)
            .bind(case.reminder_sent)
            .bind(case.reminder_sent_at)
            .bind(case.completed)
            .bind(case.completed_at)
            .bind(case.priority.as_str())
            .bind(case.status.as_str())
            .bind(&case.notes)
            .bind(&case.court)
            .bind(&case.case_number)
            .bind(Json(&case.attachments))
            .bind(&case.tags)
            .bind(case.created_at)
            .bind(case.updated_at)
            .fetch_one(&self.pool)
            .await?;

        debug!(case_id = %case.id, user_id = %case.user_id, "Inserted case");
        Case::try_from(row)
    }

    async fn find_case(&self, id: Uuid, owner: &str) -> StoreResult<Option<Case>> {
        let sql = format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Case::try_from).transpose()
    }

    async fn list_cases(&self, owner: &str, filter: CaseFilter) -> StoreResult<Vec<Case>> {
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM cases \
             WHERE user_id = $1 AND ($2::BOOLEAN IS NULL OR completed = $2) \
             ORDER BY due_date ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(owner)
            .bind(filter.completed)
            .fetch_all(&self.pool)
            .await?;
        into_cases(rows)
    }

    async fn update_case(
        &self,
        id: Uuid,
        owner: &str,
        patch: CasePatch,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {CASE_COLUMNS} FROM cases WHERE id = $1 AND user_id = $2 FOR UPDATE"
        );
        let Some(row) = sqlx::query_as::<_, CaseRow>(&select)
            .bind(id)
            .bind(owner)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut case = Case::try_from(row)?;
        case.apply_patch(patch, now);

        let update = format!(
            "UPDATE cases SET client_name = $3, case_title = $4, description = $5, due_date = $6, \
             reminder_sent = $7, reminder_sent_at = $8, completed = $9, completed_at = $10, \
             priority = $11, status = $12, notes = $13, court = $14, case_number = $15, \
             attachments = $16, tags = $17, updated_at = $18 \
             WHERE id = $1 AND user_id = $2 \
             RETURNING {CASE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CaseRow>(&update)
            .bind(id)
            .bind(owner)
            .bind(&case.client_name)
            .bind(&case.case_title)
            .bind(&case.description)
            .bind(case.due_date)
            .bind(case.reminder_sent)
            .bind(case.reminder_sent_at)
            .bind(case.completed)
            .bind(case.completed_at)
            .bind(case.priority.as_str())
            .bind(case.status.as_str())
            .bind(&case.notes)
            .bind(&case.court)
            .bind(&case.case_number)
            .bind(Json(&case.attachments))
            .bind(&case.tags)
            .bind(case.updated_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Case::try_from(row).map(Some)
    }

    async fn delete_case(&self, id: Uuid, owner: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM cases WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn search_cases(&self, owner: &str, term: &str) -> StoreResult<Vec<Case>> {
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM cases \
             WHERE user_id = $1 \
               AND (client_name ILIKE $2 OR case_title ILIKE $2 OR case_number ILIKE $2) \
             ORDER BY due_date ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(owner)
            .bind(like_pattern(term))
            .fetch_all(&self.pool)
            .await?;
        into_cases(rows)
    }

    async fn cases_due_between(
        &self,
        owner: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Case>> {
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM cases \
             WHERE user_id = $1 AND completed = FALSE AND due_date >= $2 AND due_date <= $3 \
             ORDER BY due_date ASC, created_at ASC"
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(owner)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        into_cases(rows)
    }

    async fn overdue_cases(&self, owner: &str, before: DateTime<Utc>) -> StoreResult<Vec<Case>> {
        let sql = format!(
            "SELECT {CASE_COLUMNS} FROM cases \
             WHERE user_id = $1 AND completed = FALSE AND due_date < $2 \
             ORDER BY due_date DESC"
        );
        let rows = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(owner)
            .bind(before)
            .fetch_all(&self.pool)
            .await?;
        into_cases(rows)
    }

    async fn case_stats(&self, owner: &str, bounds: StatsBounds) -> StoreResult<CaseStats> {
        let (total, overdue, due_today, upcoming, reminders, completed): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE completed = FALSE AND due_date < $2),
                COUNT(*) FILTER (WHERE due_date >= $2 AND due_date < $3),
                COUNT(*) FILTER (WHERE due_date >= $2 AND due_date <= $4),
                COUNT(*) FILTER (WHERE reminder_sent = TRUE),
                COUNT(*) FILTER (WHERE completed = TRUE)
            FROM cases
            WHERE user_id = $1
            "#,
        )
        .bind(owner)
        .bind(bounds.today_start)
        .bind(bounds.tomorrow_start)
        .bind(bounds.upcoming_end)
        .fetch_one(&self.pool)
        .await?;

        Ok(CaseStats {
            total_cases: total,
            overdue_cases: overdue,
            due_today_cases: due_today,
            upcoming_cases: upcoming,
            reminders_sent: reminders,
            completed_cases: completed,
        })
    }

    async fn cases_needing_reminder(
        &self,
        window: &DayWindow,
    ) -> StoreResult<Vec<ReminderCandidate>> {
        let rows: Vec<(Uuid, String, String, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, user_id, client_name, case_title, description, due_date
            FROM cases
            WHERE due_date >= $1
              AND due_date <= $2
              AND reminder_sent = FALSE
              AND completed = FALSE
            ORDER BY due_date ASC, id ASC
            "#,
        )
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, user_id, client_name, case_title, description, due_date)| ReminderCandidate {
                    id,
                    user_id,
                    client_name,
                    case_title,
                    description,
                    due_date,
                },
            )
            .collect())
    }

    async fn mark_reminder_sent(
        &self,
        id: Uuid,
        due_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cases
            SET reminder_sent = TRUE, reminder_sent_at = $3, updated_at = $3
            WHERE id = $1 AND due_date = $2 AND reminder_sent = FALSE
            "#,
        )
        .bind(id)
        .bind(due_date)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reset_reminder(
        &self,
        id: Uuid,
        owner: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Case>> {
        let sql = format!(
            "UPDATE cases SET reminder_sent = FALSE, reminder_sent_at = NULL, updated_at = $3 \
             WHERE id = $1 AND user_id = $2 \
             RETURNING {CASE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, CaseRow>(&sql)
            .bind(id)
            .bind(owner)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Case::try_from).transpose()
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user(&self, uid: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE uid = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_or_create_user(
        &self,
        profile: UserProfile,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let has_display_name = profile
            .display_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty());
        let fresh = User::from_profile(profile, at);

        let sql = format!(
            "INSERT INTO users (uid, email, display_name, photo_url, email_verified, \
                                last_login_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6, $6) \
             ON CONFLICT (uid) DO UPDATE SET \
                 email = COALESCE(EXCLUDED.email, users.email), \
                 display_name = CASE WHEN $7 THEN EXCLUDED.display_name ELSE users.display_name END, \
                 photo_url = COALESCE(EXCLUDED.photo_url, users.photo_url), \
                 email_verified = EXCLUDED.email_verified, \
                 last_login_at = EXCLUDED.last_login_at, \
                 updated_at = EXCLUDED.updated_at \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(&fresh.uid)
            .bind(&fresh.email)
            .bind(&fresh.display_name)
            .bind(&fresh.photo_url)
            .bind(fresh.email_verified)
            .bind(at)
            .bind(has_display_name)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_preferences(
        &self,
        uid: &str,
        prefs: UserPreferences,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
                 display_name = COALESCE($2, display_name), \
                 notifications_enabled = COALESCE($3, notifications_enabled), \
                 email_notifications_enabled = COALESCE($4, email_notifications_enabled), \
                 updated_at = $5 \
             WHERE uid = $1 \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(prefs.display_name.map(|n| n.trim().to_string()))
            .bind(prefs.notifications_enabled)
            .bind(prefs.email_notifications_enabled)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn add_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
                 device_tokens = CASE WHEN $2 = ANY(device_tokens) THEN device_tokens \
                                      ELSE array_append(device_tokens, $2) END, \
                 updated_at = CASE WHEN $2 = ANY(device_tokens) THEN updated_at ELSE $3 END \
             WHERE uid = $1 \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(token)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn remove_device_token(
        &self,
        uid: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET \
                 device_tokens = array_remove(device_tokens, $2), \
                 updated_at = CASE WHEN $2 = ANY(device_tokens) THEN $3 ELSE updated_at END \
             WHERE uid = $1 \
             RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(token)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn remove_device_tokens(&self, uid: &str, tokens: &[String]) -> StoreResult<usize> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let removed: Option<i32> = sqlx::query_scalar(
            r#"
            WITH old AS (
                SELECT uid, cardinality(device_tokens) AS n FROM users WHERE uid = $1
            )
            UPDATE users u
            SET device_tokens = ARRAY(
                SELECT t
                FROM unnest(u.device_tokens) WITH ORDINALITY AS x(t, i)
                WHERE t <> ALL($2)
                ORDER BY i
            )
            FROM old
            WHERE u.uid = old.uid AND u.device_tokens && $2
            RETURNING old.n - cardinality(u.device_tokens)
            "#,
        )
        .bind(uid)
        .bind(tokens)
        .fetch_optional(&self.pool)
        .await?;

        Ok(removed.map_or(0, |n| n.max(0) as usize))
    }

    async fn clear_device_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET device_tokens = '{{}}', updated_at = $2 \
             WHERE uid = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn set_user_active(
        &self,
        uid: &str,
        active: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET is_active = $2, updated_at = $3 WHERE uid = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(active)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn revoke_tokens(&self, uid: &str, at: DateTime<Utc>) -> StoreResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET tokens_valid_after = $2, updated_at = $2 \
             WHERE uid = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(uid)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl RecordStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(health_check(&self.pool).await?)
    }
}
