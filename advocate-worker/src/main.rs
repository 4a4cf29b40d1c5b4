//! # Advocate Reminder Worker
//!
//! Runs the reminder sweep once a day at the configured local time.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p advocate-worker            # daily schedule
//! cargo run -p advocate-worker -- --once  # single sweep, summary on stdout
//! ```

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advocate_shared::calendar::SystemClock;
use advocate_shared::config::StoreConfig;
use advocate_shared::store::connect_store;
use advocate_worker::config::{PushConfig, ReminderConfig};
use advocate_worker::push::build_gateway;
use advocate_worker::scheduler::ReminderScheduler;
use advocate_worker::sweep::{ReminderSweep, SweepTrigger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "advocate_worker=debug,advocate_shared=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Advocate Reminder Worker v{} starting", env!("CARGO_PKG_VERSION"));

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let reminder = ReminderConfig::from_env()?;
    let store = connect_store(&StoreConfig::from_env()?).await?;
    let gateway = build_gateway(&PushConfig::from_env()?)?;
    tracing::info!(store = store.backend(), gateway = gateway.name(), "Services ready");

    let sweep = Arc::new(ReminderSweep::new(store, gateway, Arc::new(SystemClock), &reminder)?);

    if once {
        let summary = sweep.run(SweepTrigger::Manual).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let scheduler = ReminderScheduler::new(sweep, &reminder);
    let shutdown = scheduler.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    scheduler.run().await?;
    tracing::info!("Worker stopped");
    Ok(())
}
