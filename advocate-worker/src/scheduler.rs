/// Daily scheduler for the reminder sweep
///
/// Sleeps until the next local occurrence of `run_at`, runs the sweep, logs
/// the summary and repeats until its shutdown token is cancelled. A run that
/// is in progress when shutdown is requested finishes first.
///
/// The next run is always computed from the later of "now" and the previous
/// fire time, so a timer that wakes a little early cannot fire twice for the
/// same day.
///
/// # Example
///
/// ```no_run
/// use advocate_worker::scheduler::ReminderScheduler;
/// use advocate_worker::sweep::ReminderSweep;
/// use advocate_worker::config::ReminderConfig;
/// use std::sync::Arc;
///
/// # async fn example(sweep: Arc<ReminderSweep>) -> anyhow::Result<()> {
/// let scheduler = ReminderScheduler::new(sweep, &ReminderConfig::default());
/// let shutdown = scheduler.shutdown_token();
///
/// tokio::spawn(async move {
///     tokio::signal::ctrl_c().await.ok();
///     shutdown.cancel();
/// });
///
/// scheduler.run().await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, NaiveTime, Utc};
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ReminderConfig;
use crate::sweep::{ReminderSweep, SweepTrigger};

pub struct ReminderScheduler {
    sweep: Arc<ReminderSweep>,
    run_at: NaiveTime,
    run_on_start: bool,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(sweep: Arc<ReminderSweep>, config: &ReminderConfig) -> Self {
        Self {
            sweep,
            run_at: config.run_at,
            run_on_start: config.run_on_start,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the scheduler when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// First scheduled run strictly after `after`
    pub fn next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        self.sweep.calendar().next_occurrence(after, self.run_at)
    }

    /// Runs until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            run_at = %self.run_at,
            offset = %self.sweep.calendar().offset(),
            "Reminder scheduler starting"
        );

        if self.run_on_start && !self.shutdown.is_cancelled() {
            self.fire(SweepTrigger::Startup).await;
        }

        let clock = self.sweep.clock();
        let mut last_fire: Option<DateTime<Utc>> = None;

        loop {
            let now = clock.now();
            let next = self.next_run(last_fire.map_or(now, |last| last.max(now)));
            let wait = (next - now).to_std().unwrap_or_default();

            info!(next_run = %next, wait_secs = wait.as_secs(), "Next reminder sweep scheduled");

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Reminder scheduler shutting down");
                    break;
                }
                _ = sleep(wait) => {}
            }

            last_fire = Some(next);
            self.fire(SweepTrigger::Scheduled).await;
        }

        Ok(())
    }

    async fn fire(&self, trigger: SweepTrigger) {
        // Failures are logged and the next day is tried again
        if let Err(e) = self.sweep.run(trigger).await {
            error!(trigger = %trigger, error = %e, "Scheduled reminder sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::MockGateway;
    use advocate_shared::calendar::{Clock, FixedClock};
    use advocate_shared::models::{CasePriority, CaseStatus, NewCase, UserProfile};
    use advocate_shared::store::{CaseStore, MemoryStore, UserStore};
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: MockGateway,
        clock: FixedClock,
        sweep: Arc<ReminderSweep>,
    }

    fn fixture(config: &ReminderConfig) -> Fixture {
        // 08:59:59 IST on 2026-03-10
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 3, 29, 59).unwrap());
        let store = Arc::new(MemoryStore::new());
        let gateway = MockGateway::new();
        let sweep = Arc::new(
            ReminderSweep::new(
                store.clone(),
                Arc::new(gateway.clone()),
                Arc::new(clock.clone()),
                config,
            )
            .unwrap(),
        );
        Fixture {
            store,
            gateway,
            clock,
            sweep,
        }
    }

    async fn seed_case(f: &Fixture, days_after_today: i64) {
        let cal = f.sweep.calendar();
        let now = f.clock.now();
        f.store
            .find_or_create_user(
                UserProfile {
                    uid: "alice".to_string(),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();
        f.store.add_device_token("alice", "phone", now).await.unwrap();
        f.store
            .insert_case(
                NewCase {
                    user_id: "alice".to_string(),
                    client_name: "Client".to_string(),
                    case_title: format!("Due +{}", days_after_today),
                    description: String::new(),
                    due_date: cal.start_of_day(cal.add_days(cal.today(&f.clock), days_after_today)),
                    priority: CasePriority::Medium,
                    status: CaseStatus::Pending,
                    notes: String::new(),
                    court: String::new(),
                    case_number: String::new(),
                    attachments: vec![],
                    tags: vec![],
                },
                now,
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_next_run_is_strictly_after() {
        let f = fixture(&ReminderConfig::default());
        let scheduler = ReminderScheduler::new(f.sweep.clone(), &ReminderConfig::default());

        let before = Utc.with_ymd_and_hms(2026, 3, 10, 3, 0, 0).unwrap();
        assert_eq!(
            scheduler.next_run(before),
            Utc.with_ymd_and_hms(2026, 3, 10, 3, 30, 0).unwrap()
        );

        let exactly = Utc.with_ymd_and_hms(2026, 3, 10, 3, 30, 0).unwrap();
        assert_eq!(
            scheduler.next_run(exactly),
            Utc.with_ymd_and_hms(2026, 3, 11, 3, 30, 0).unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_day() {
        let config = ReminderConfig::default();
        let f = fixture(&config);
        seed_case(&f, 2).await;

        let scheduler = Arc::new(ReminderScheduler::new(f.sweep.clone(), &config));
        let shutdown = scheduler.shutdown_token();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        sleep(std::time::Duration::from_millis(500)).await;
        assert_eq!(f.gateway.delivered_count(), 0);

        sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(f.gateway.delivered_count(), 1);

        // Next morning a new case is due in two days
        f.clock.set(Utc.with_ymd_and_hms(2026, 3, 11, 3, 30, 0).unwrap());
        seed_case(&f, 2).await;
        sleep(std::time::Duration::from_secs(86_400 + 10)).await;
        assert_eq!(f.gateway.delivered_count(), 2);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start() {
        let config = ReminderConfig {
            run_on_start: true,
            ..Default::default()
        };
        let f = fixture(&config);
        seed_case(&f, 2).await;

        let scheduler = Arc::new(ReminderScheduler::new(f.sweep.clone(), &config));
        let shutdown = scheduler.shutdown_token();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(f.gateway.delivered_count(), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_run() {
        let config = ReminderConfig::default();
        let f = fixture(&config);
        let scheduler = ReminderScheduler::new(f.sweep.clone(), &config);
        scheduler.shutdown_token().cancel();

        scheduler.run().await.unwrap();
        assert!(f.gateway.sent().is_empty());
    }
}
