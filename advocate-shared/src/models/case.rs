/// Case model
///
/// A case is a legal matter tracked by exactly one user (its owner). The
/// owner is referenced by the identity provider's stable user identifier,
/// never embedded.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE cases (
///     id UUID PRIMARY KEY,
///     user_id TEXT NOT NULL,
///     client_name VARCHAR(200) NOT NULL,
///     case_title VARCHAR(300) NOT NULL,
///     description VARCHAR(2000) NOT NULL,
///     due_date TIMESTAMPTZ NOT NULL,
///     reminder_sent BOOLEAN NOT NULL DEFAULT FALSE,
///     reminder_sent_at TIMESTAMPTZ,
///     completed BOOLEAN NOT NULL DEFAULT FALSE,
///     completed_at TIMESTAMPTZ,
///     priority TEXT NOT NULL DEFAULT 'medium',
///     status TEXT NOT NULL DEFAULT 'pending',
///     notes VARCHAR(1000) NOT NULL DEFAULT '',
///     court VARCHAR(200) NOT NULL DEFAULT '',
///     case_number VARCHAR(100) NOT NULL DEFAULT '',
///     attachments JSONB NOT NULL DEFAULT '[]',
///     tags TEXT[] NOT NULL DEFAULT '{}',
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// # Reminder invariant
///
/// `reminder_sent` flips from false to true at most once per due-date value.
/// Moving the due date to another calendar day makes the case eligible for a
/// new reminder (see [`Case::apply_patch`]).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::calendar::Calendar;

/// Case priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CasePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl CasePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            CasePriority::Low => "low",
            CasePriority::Medium => "medium",
            CasePriority::High => "high",
            CasePriority::Urgent => "urgent",
        }
    }
}

impl FromStr for CasePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(CasePriority::Low),
            "medium" => Ok(CasePriority::Medium),
            "high" => Ok(CasePriority::High),
            "urgent" => Ok(CasePriority::Urgent),
            other => Err(format!("Unknown priority: {}", other)),
        }
    }
}

impl fmt::Display for CasePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case workflow status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Pending => "pending",
            CaseStatus::InProgress => "in-progress",
            CaseStatus::Completed => "completed",
            CaseStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(CaseStatus::Pending),
            "in-progress" => Ok(CaseStatus::InProgress),
            "completed" => Ok(CaseStatus::Completed),
            "cancelled" => Ok(CaseStatus::Cancelled),
            other => Err(format!("Unknown status: {}", other)),
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document attached to a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A tracked legal case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    /// Case ID
    pub id: Uuid,

    /// Owner's stable identifier (from the identity provider)
    pub user_id: String,

    /// Client / party name
    pub client_name: String,

    /// Case title
    pub case_title: String,

    /// Case description
    pub description: String,

    /// Hearing or filing date, normalized to the start of its calendar day
    pub due_date: DateTime<Utc>,

    /// Whether the due-date reminder has gone out for the current due date
    pub reminder_sent: bool,

    /// When the reminder went out
    pub reminder_sent_at: Option<DateTime<Utc>>,

    /// Whether the case is closed
    pub completed: bool,

    /// When the case was closed
    pub completed_at: Option<DateTime<Utc>>,

    pub priority: CasePriority,

    pub status: CaseStatus,

    pub notes: String,

    /// Court or location
    pub court: String,

    pub case_number: String,

    pub attachments: Vec<Attachment>,

    /// Lowercased, deduplicated tags
    pub tags: Vec<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a case
///
/// Values are expected to be validated and trimmed already; the store
/// persists them as given.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCase {
    pub user_id: String,
    pub client_name: String,
    pub case_title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    pub priority: CasePriority,
    pub status: CaseStatus,
    pub notes: String,
    pub court: String,
    pub case_number: String,
    pub attachments: Vec<Attachment>,
    pub tags: Vec<String>,
}

/// Partial update of a case
///
/// Only `Some` fields change. Reminder fields are deliberately absent: they are
/// owned by the reminder sweep and only reset through a due-date change or an
/// explicit reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CasePatch {
    pub client_name: Option<String>,
    pub case_title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<CasePriority>,
    pub status: Option<CaseStatus>,
    pub notes: Option<String>,
    pub court: Option<String>,
    pub case_number: Option<String>,
    pub attachments: Option<Vec<Attachment>>,
    pub tags: Option<Vec<String>>,
    pub completed: Option<bool>,
}

impl CasePatch {
    /// Patch that only closes the case
    pub fn complete() -> Self {
        Self {
            completed: Some(true),
            ..Default::default()
        }
    }

    /// Whether the patch changes anything at all
    pub fn is_empty(&self) -> bool {
        *self == CasePatch::default()
    }
}

/// Filter for listing a user's cases
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseFilter {
    /// Restrict to completed (`Some(true)`) or open (`Some(false)`) cases
    pub completed: Option<bool>,
}

/// The fields the reminder sweep needs from a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderCandidate {
    pub id: Uuid,
    pub user_id: String,
    pub client_name: String,
    pub case_title: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
}

impl From<&Case> for ReminderCandidate {
    fn from(case: &Case) -> Self {
        Self {
            id: case.id,
            user_id: case.user_id.clone(),
            client_name: case.client_name.clone(),
            case_title: case.case_title.clone(),
            description: case.description.clone(),
            due_date: case.due_date,
        }
    }
}

/// Instants used to compute per-user statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsBounds {
    /// Start of today
    pub today_start: DateTime<Utc>,

    /// Start of tomorrow
    pub tomorrow_start: DateTime<Utc>,

    /// Inclusive end of the "upcoming" range (start of today + 7 days)
    pub upcoming_end: DateTime<Utc>,
}

impl StatsBounds {
    /// Bounds for `today` with a seven-day upcoming range
    pub fn for_day(calendar: &Calendar, today: NaiveDate) -> Self {
        Self {
            today_start: calendar.start_of_day(today),
            tomorrow_start: calendar.start_of_day(calendar.add_days(today, 1)),
            upcoming_end: calendar.start_of_day(calendar.add_days(today, 7)),
        }
    }
}

/// Per-user case counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseStats {
    pub total_cases: i64,
    /// Open cases due before today
    pub overdue_cases: i64,
    pub due_today_cases: i64,
    /// Cases due from today through the next seven days
    pub upcoming_cases: i64,
    pub reminders_sent: i64,
    pub completed_cases: i64,
}

impl Case {
    /// Builds a case from creation input
    pub fn from_new(id: Uuid, data: NewCase, now: DateTime<Utc>) -> Self {
        let completed = data.status == CaseStatus::Completed;
        Self {
            id,
            user_id: data.user_id,
            client_name: data.client_name,
            case_title: data.case_title,
            description: data.description,
            due_date: data.due_date,
            reminder_sent: false,
            reminder_sent_at: None,
            completed,
            completed_at: completed.then_some(now),
            priority: data.priority,
            status: data.status,
            notes: data.notes,
            court: data.court,
            case_number: data.case_number,
            attachments: data.attachments,
            tags: normalize_tags(data.tags),
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a partial update
    ///
    /// A due date on a different instant resets the reminder. Completing a
    /// case stamps `completed_at` (once) and moves the status to completed;
    /// reopening clears the stamp.
    pub fn apply_patch(&mut self, patch: CasePatch, now: DateTime<Utc>) {
        if let Some(v) = patch.client_name {
            self.client_name = v;
        }
        if let Some(v) = patch.case_title {
            self.case_title = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(due_date) = patch.due_date {
            if due_date != self.due_date {
                self.due_date = due_date;
                self.reset_reminder();
            }
        }
        if let Some(v) = patch.priority {
            self.priority = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.notes {
            self.notes = v;
        }
        if let Some(v) = patch.court {
            self.court = v;
        }
        if let Some(v) = patch.case_number {
            self.case_number = v;
        }
        if let Some(v) = patch.attachments {
            self.attachments = v;
        }
        if let Some(v) = patch.tags {
            self.tags = normalize_tags(v);
        }

        match patch.completed {
            Some(true) => self.mark_completed(now),
            Some(false) => {
                self.completed = false;
                self.completed_at = None;
                if self.status == CaseStatus::Completed {
                    self.status = CaseStatus::Pending;
                }
            }
            None if self.status == CaseStatus::Completed && !self.completed => {
                self.mark_completed(now);
            }
            None if self.status != CaseStatus::Completed && self.completed => {
                self.completed = false;
                self.completed_at = None;
            }
            None => {}
        }

        self.updated_at = now;
    }

    fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.completed = true;
        if self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        self.status = CaseStatus::Completed;
    }

    /// Clears the reminder flags so the next sweep may notify again
    pub fn reset_reminder(&mut self) {
        self.reminder_sent = false;
        self.reminder_sent_at = None;
    }

    /// Calendar days until the due date (negative once it has passed)
    pub fn days_until_due(&self, calendar: &Calendar, today: NaiveDate) -> i64 {
        calendar.days_between(today, calendar.date_of(self.due_date))
    }

    /// Whether an open case is past its due date
    pub fn is_overdue(&self, calendar: &Calendar, today: NaiveDate) -> bool {
        !self.completed && calendar.date_of(self.due_date) < today
    }

    /// Checks ownership
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}

/// Trims, lowercases and deduplicates tags, keeping first-seen order
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}
