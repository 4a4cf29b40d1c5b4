/// Reminder Sweep
///
/// Finds every open case due exactly `lead_days` calendar days from today,
/// pushes a reminder to each of the owner's devices and marks the case so it
/// is not reminded again for the same due date.
///
/// # Algorithm
///
/// 1. Compute the inclusive window of the target day in the configured time
///    zone, using the injected [`Clock`].
/// 2. Load candidates: due inside the window, reminder not sent, not completed.
///    A store failure here aborts the run with [`SweepError::Store`].
/// 3. For each candidate, in order:
///    - resolve the owner; no usable owner or no devices is `NoTarget`
///    - send to every device with bounded concurrency
///    - remove all permanently invalid tokens in one update
///    - if anything was delivered, conditionally mark the case as sent
/// 4. Return a [`SweepSummary`] with one [`CaseReport`] per candidate.
///
/// # Concurrency
///
/// One sweep instance never runs twice at the same time: runs queue on an
/// async mutex, so a manual trigger during a scheduled run waits for it and
/// then finds nothing left to do. Separate processes are kept from marking a
/// case twice by the conditional write in
/// [`CaseStore::mark_reminder_sent`]. Only the winner reports `Notified`.

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use advocate_shared::calendar::{Calendar, Clock};
use advocate_shared::models::{token_fingerprint, ReminderCandidate};
use advocate_shared::store::{RecordStore, StoreError};

use crate::config::ReminderConfig;
use crate::push::{DeliveryOutcome, PushGateway, PushMessage};

/// Sweep errors
///
/// Only failures that prevent the whole run end up here; per-case problems
/// are reported in the summary.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("failed to load reminder candidates: {0}")]
    Store(#[from] StoreError),
}

/// What started a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTrigger {
    Scheduled,
    Startup,
    Manual,
}

impl fmt::Display for SweepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepTrigger::Scheduled => write!(f, "scheduled"),
            SweepTrigger::Startup => write!(f, "startup"),
            SweepTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// How one case ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    /// Delivered to at least one device and marked as sent
    Notified,

    /// Owner missing, inactive, opted out or without devices
    NoTarget,

    /// Nothing delivered or the case could not be marked; retried next run
    Failed,

    /// Delivered, but another run marked the case first
    AlreadyNotified,
}

/// Per-case result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    pub case_id: Uuid,
    pub user_id: String,
    pub outcome: CaseOutcome,
    pub devices_delivered: usize,
    pub devices_failed: usize,
    pub tokens_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CaseReport {
    fn new(case: &ReminderCandidate, outcome: CaseOutcome) -> Self {
        Self {
            case_id: case.id,
            user_id: case.user_id.clone(),
            outcome,
            devices_delivered: 0,
            devices_failed: 0,
            tokens_removed: 0,
            reason: None,
        }
    }

    fn because(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Result of one sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub trigger: SweepTrigger,

    /// The calendar day whose cases were reminded
    pub window_date: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    pub processed: usize,
    pub notified: usize,
    pub failed: usize,
    pub no_target: usize,
    pub already_notified: usize,
    pub devices_delivered: usize,
    pub tokens_removed: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    pub cases: Vec<CaseReport>,
}

impl SweepSummary {
    fn tally(&mut self) {
        let count = |o: CaseOutcome| self.cases.iter().filter(|c| c.outcome == o).count();
        let (notified, failed, no_target, already) = (
            count(CaseOutcome::Notified),
            count(CaseOutcome::Failed),
            count(CaseOutcome::NoTarget),
            count(CaseOutcome::AlreadyNotified),
        );

        self.processed = self.cases.len();
        self.notified = notified;
        self.failed = failed;
        self.no_target = no_target;
        self.already_notified = already;
        self.devices_delivered = self.cases.iter().map(|c| c.devices_delivered).sum();
        self.tokens_removed = self.cases.iter().map(|c| c.tokens_removed).sum();
    }
}

/// The daily reminder job
pub struct ReminderSweep {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn PushGateway>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    lead_days: i64,
    max_concurrent_deliveries: usize,
    running: Mutex<()>,
}

impl ReminderSweep {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn PushGateway>,
        clock: Arc<dyn Clock>,
        config: &ReminderConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            gateway,
            clock,
            calendar: config.calendar()?,
            lead_days: config.lead_days,
            max_concurrent_deliveries: config.max_concurrent_deliveries,
            running: Mutex::new(()),
        })
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Runs one sweep, waiting for any run already in progress to finish
    pub async fn run(&self, trigger: SweepTrigger) -> Result<SweepSummary, SweepError> {
        let _running = self.running.lock().await;

        let started_at = self.clock.now();
        let today = self.calendar.date_of(started_at);
        let window = self.calendar.day_window(self.calendar.add_days(today, self.lead_days));

        info!(
            trigger = %trigger,
            gateway = self.gateway.name(),
            window_date = %window.date,
            "Reminder sweep starting"
        );

        let candidates = self.store.cases_needing_reminder(&window).await.map_err(|e| {
            error!(trigger = %trigger, error = %e, "Reminder sweep aborted");
            e
        })?;

        debug!(count = candidates.len(), "Loaded reminder candidates");

        let mut cases = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let report = self.process_case(candidate).await;
            debug!(
                case_id = %report.case_id,
                outcome = ?report.outcome,
                delivered = report.devices_delivered,
                "Case processed"
            );
            cases.push(report);
        }

        let mut summary = SweepSummary {
            trigger,
            window_date: window.date,
            window_start: window.start,
            window_end: window.end,
            processed: 0,
            notified: 0,
            failed: 0,
            no_target: 0,
            already_notified: 0,
            devices_delivered: 0,
            tokens_removed: 0,
            started_at,
            finished_at: self.clock.now(),
            cases,
        };
        summary.tally();

        info!(
            trigger = %trigger,
            window_date = %summary.window_date,
            processed = summary.processed,
            notified = summary.notified,
            failed = summary.failed,
            no_target = summary.no_target,
            already_notified = summary.already_notified,
            devices_delivered = summary.devices_delivered,
            tokens_removed = summary.tokens_removed,
            "Reminder sweep finished"
        );

        Ok(summary)
    }

    async fn process_case(&self, case: &ReminderCandidate) -> CaseReport {
        let user = match self.store.find_user(&case.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(case_id = %case.id, user_id = %case.user_id, "Case owner not found");
                return CaseReport::new(case, CaseOutcome::NoTarget).because("owner not found");
            }
            Err(e) => {
                error!(case_id = %case.id, error = %e, "Failed to load case owner");
                return CaseReport::new(case, CaseOutcome::Failed).because(e.to_string());
            }
        };

        if !user.accepts_push() {
            let reason = if !user.is_active {
                "owner inactive"
            } else if !user.notifications_enabled {
                "notifications disabled"
            } else {
                "no registered devices"
            };
            info!(case_id = %case.id, user_id = %user.uid, reason, "No push target for case");
            return CaseReport::new(case, CaseOutcome::NoTarget).because(reason);
        }

        let message = PushMessage::case_reminder(case, self.lead_days);
        let gateway = &self.gateway;
        let message = &message;

        let results: Vec<(String, DeliveryOutcome)> = stream::iter(user.device_tokens.clone())
            .map(|token: String| async move {
                let result = gateway.send(&token, message).await;
                let outcome = DeliveryOutcome::of(&result);
                match &result {
                    Ok(receipt) => debug!(
                        case_id = %case.id,
                        device = %token_fingerprint(&token),
                        message_id = %receipt.message_id,
                        "Reminder delivered"
                    ),
                    Err(e) => warn!(
                        case_id = %case.id,
                        device = %token_fingerprint(&token),
                        outcome = %outcome,
                        error = %e,
                        "Reminder delivery failed"
                    ),
                }
                (token, outcome)
            })
            .buffer_unordered(self.max_concurrent_deliveries)
            .collect()
            .await;

        let mut report = CaseReport::new(case, CaseOutcome::Failed);
        let mut invalid = Vec::new();
        for (token, outcome) in results {
            match outcome {
                DeliveryOutcome::Delivered => report.devices_delivered += 1,
                DeliveryOutcome::InvalidTarget => {
                    report.devices_failed += 1;
                    invalid.push(token);
                }
                DeliveryOutcome::TransientFailure => report.devices_failed += 1,
            }
        }

        if !invalid.is_empty() {
            match self.store.remove_device_tokens(&user.uid, &invalid).await {
                Ok(removed) => {
                    info!(user_id = %user.uid, removed, "Removed invalid device tokens");
                    report.tokens_removed = removed;
                }
                Err(e) => {
                    error!(user_id = %user.uid, error = %e, "Failed to remove invalid device tokens")
                }
            }
        }

        if report.devices_delivered == 0 {
            return report.because("no device accepted the reminder");
        }

        match self
            .store
            .mark_reminder_sent(case.id, case.due_date, self.clock.now())
            .await
        {
            Ok(true) => {
                report.outcome = CaseOutcome::Notified;
                report
            }
            Ok(false) => {
                info!(case_id = %case.id, "Reminder already marked by another run");
                report.outcome = CaseOutcome::AlreadyNotified;
                report
            }
            Err(e) => {
                error!(case_id = %case.id, error = %e, "Failed to mark reminder as sent");
                report.because(format!("delivered but not marked: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::MockGateway;
    use advocate_shared::calendar::FixedClock;
    use advocate_shared::models::{CasePatch, CasePriority, CaseStatus, NewCase, UserPreferences, UserProfile};
    use advocate_shared::store::{CaseStore, MemoryStore, UserStore};
    use chrono::{Duration, TimeZone};

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: MockGateway,
        clock: FixedClock,
        sweep: Arc<ReminderSweep>,
    }

    impl Harness {
        fn new() -> Self {
            // 09:00 IST on 2026-03-10
            let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 3, 30, 0).unwrap());
            let store = Arc::new(MemoryStore::new());
            let gateway = MockGateway::new();
            let sweep = Arc::new(
                ReminderSweep::new(
                    store.clone(),
                    Arc::new(gateway.clone()),
                    Arc::new(clock.clone()),
                    &ReminderConfig::default(),
                )
                .unwrap(),
            );
            Self {
                store,
                gateway,
                clock,
                sweep,
            }
        }

        fn calendar(&self) -> Calendar {
            self.sweep.calendar()
        }

        fn due_in(&self, days: i64) -> DateTime<Utc> {
            let cal = self.calendar();
            cal.start_of_day(cal.add_days(cal.today(&self.clock), days))
        }

        async fn user(&self, uid: &str, tokens: &[&str]) {
            let now = self.clock.now();
            self.store
                .find_or_create_user(
                    UserProfile {
                        uid: uid.to_string(),
                        email: Some(format!("{}@example.com", uid)),
                        ..Default::default()
                    },
                    now,
                )
                .await
                .unwrap();
            for token in tokens {
                self.store.add_device_token(uid, token, now).await.unwrap();
            }
        }

        async fn case(&self, owner: &str, title: &str, due: DateTime<Utc>) -> Uuid {
            let data = NewCase {
                user_id: owner.to_string(),
                client_name: "Ravi Kumar".to_string(),
                case_title: title.to_string(),
                description: String::new(),
                due_date: due,
                priority: CasePriority::High,
                status: CaseStatus::Pending,
                notes: String::new(),
                court: String::new(),
                case_number: String::new(),
                attachments: vec![],
                tags: vec![],
            };
            self.store.insert_case(data, self.clock.now()).await.unwrap().id
        }

        async fn reminder_sent(&self, id: Uuid, owner: &str) -> bool {
            self.store.find_case(id, owner).await.unwrap().unwrap().reminder_sent
        }
    }

    #[tokio::test]
    async fn test_invalid_device_is_removed_and_case_marked() {
        let h = Harness::new();
        h.user("alice", &["phone", "old-tablet"]).await;
        h.gateway.invalidate("old-tablet");
        let id = h.case("alice", "Title suit", h.due_in(2)).await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.devices_delivered, 1);
        assert_eq!(summary.tokens_removed, 1);
        assert!(h.reminder_sent(id, "alice").await);

        let user = h.store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.device_tokens, vec!["phone".to_string()]);

        let sent = h.gateway.sent();
        let delivered = sent.iter().find(|s| s.delivered).unwrap();
        assert_eq!(delivered.message.data["caseId"], id.to_string());
        assert_eq!(
            delivered.message.body,
            "Your case \"Title suit\" for Ravi Kumar is due in 2 days."
        );
    }

    #[tokio::test]
    async fn test_owner_without_devices_is_retried() {
        let h = Harness::new();
        h.user("bob", &[]).await;
        let id = h.case("bob", "Appeal", h.due_in(2)).await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.no_target, 1);
        assert_eq!(summary.notified, 0);
        assert_eq!(summary.cases[0].reason.as_deref(), Some("no registered devices"));
        assert!(!h.reminder_sent(id, "bob").await);

        // Once a device shows up the next run picks the case up
        h.store.add_device_token("bob", "phone", h.clock.now()).await.unwrap();
        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.notified, 1);
        assert!(h.reminder_sent(id, "bob").await);
    }

    #[tokio::test]
    async fn test_second_run_sends_nothing() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        h.case("alice", "Writ petition", h.due_in(2)).await;

        let first = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(first.notified, 1);

        let second = h.sweep.run(SweepTrigger::Manual).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(h.gateway.delivered_count(), 1);
    }

    #[tokio::test]
    async fn test_only_the_target_day_is_swept() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        let tomorrow = h.case("alice", "Tomorrow", h.due_in(1)).await;
        let target = h.case("alice", "Target", h.due_in(2)).await;
        let later = h.case("alice", "Later", h.due_in(3)).await;
        // Last millisecond of the target day still counts
        let late_target = h
            .case("alice", "Late target", h.due_in(3) - Duration::milliseconds(1))
            .await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(
            summary.window_date,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 12).unwrap()
        );

        assert!(!h.reminder_sent(tomorrow, "alice").await);
        assert!(h.reminder_sent(target, "alice").await);
        assert!(h.reminder_sent(late_target, "alice").await);
        assert!(!h.reminder_sent(later, "alice").await);
    }

    #[tokio::test]
    async fn test_completed_cases_are_skipped() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        let id = h.case("alice", "Settled", h.due_in(2)).await;
        h.store
            .update_case(id, "alice", CasePatch::complete(), h.clock.now())
            .await
            .unwrap();

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.processed, 0);
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_case_unmarked() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        h.gateway.fail("phone");
        let id = h.case("alice", "Revision", h.due_in(2)).await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.tokens_removed, 0);
        assert!(!h.reminder_sent(id, "alice").await);

        let user = h.store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.device_tokens.len(), 1);
    }

    #[tokio::test]
    async fn test_one_bad_case_does_not_stop_the_others() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        h.user("carol", &["laptop"]).await;
        h.gateway.fail("laptop");
        let failing = h.case("carol", "Failing", h.due_in(2)).await;
        let orphan = h.case("ghost", "Orphan", h.due_in(2)).await;
        let fine = h.case("alice", "Fine", h.due_in(2)).await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.notified, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.no_target, 1);

        let outcome = |id: Uuid| summary.cases.iter().find(|c| c.case_id == id).unwrap().outcome;
        assert_eq!(outcome(failing), CaseOutcome::Failed);
        assert_eq!(outcome(orphan), CaseOutcome::NoTarget);
        assert_eq!(outcome(fine), CaseOutcome::Notified);
    }

    #[tokio::test]
    async fn test_opted_out_and_inactive_owners_have_no_target() {
        let h = Harness::new();
        h.user("quiet", &["phone"]).await;
        h.user("gone", &["phone-2"]).await;
        h.store
            .update_preferences(
                "quiet",
                UserPreferences {
                    notifications_enabled: Some(false),
                    ..Default::default()
                },
                h.clock.now(),
            )
            .await
            .unwrap();
        h.store.set_user_active("gone", false, h.clock.now()).await.unwrap();
        h.case("quiet", "A", h.due_in(2)).await;
        h.case("gone", "B", h.due_in(2)).await;

        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.no_target, 2);
        assert!(h.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_aborts_the_run() {
        let h = Harness::new();
        h.store.set_offline(true);

        let err = h.sweep.run(SweepTrigger::Scheduled).await.unwrap_err();
        assert!(matches!(err, SweepError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_moved_due_date_is_reminded_again() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        let id = h.case("alice", "Adjourned", h.due_in(2)).await;
        h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert!(h.reminder_sent(id, "alice").await);

        // Hearing adjourned by a week; a week later it is due again
        let patch = CasePatch {
            due_date: Some(h.due_in(9)),
            ..Default::default()
        };
        h.store.update_case(id, "alice", patch, h.clock.now()).await.unwrap();
        assert!(!h.reminder_sent(id, "alice").await);

        h.clock.advance(Duration::days(7));
        let summary = h.sweep.run(SweepTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.notified, 1);
        assert_eq!(h.gateway.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_runs_of_one_sweep_notify_once() {
        let h = Harness::new();
        h.user("alice", &["phone", "tablet"]).await;
        h.gateway.set_latency(std::time::Duration::from_millis(20));
        h.case("alice", "Overlap", h.due_in(2)).await;

        let (a, b) = tokio::join!(
            h.sweep.run(SweepTrigger::Scheduled),
            h.sweep.run(SweepTrigger::Manual)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.notified + b.notified, 1);
        assert_eq!(a.processed + b.processed, 1);
        assert_eq!(h.gateway.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_competing_sweeps_mark_once() {
        let h = Harness::new();
        h.user("alice", &["phone"]).await;
        h.gateway.set_latency(std::time::Duration::from_millis(20));
        let id = h.case("alice", "Race", h.due_in(2)).await;

        // A second instance stands in for another worker process
        let other = ReminderSweep::new(
            h.store.clone(),
            Arc::new(h.gateway.clone()),
            Arc::new(h.clock.clone()),
            &ReminderConfig::default(),
        )
        .unwrap();

        let (a, b) = tokio::join!(
            h.sweep.run(SweepTrigger::Scheduled),
            other.run(SweepTrigger::Manual)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.notified + b.notified, 1);
        assert_eq!(a.already_notified + b.already_notified, 1);
        assert!(h.reminder_sent(id, "alice").await);
    }

    #[tokio::test]
    async fn test_run_on_a_spawned_task() {
        let h = Harness::new();
        h.user("alice", &["phone", "tablet"]).await;
        let id = h.case("alice", "Spawned", h.due_in(2)).await;

        let sweep = h.sweep.clone();
        let summary = tokio::spawn(async move { sweep.run(SweepTrigger::Manual).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.notified, 1);
        assert_eq!(summary.devices_delivered, 2);
        assert!(h.reminder_sent(id, "alice").await);
    }
}
