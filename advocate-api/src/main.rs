//! # Advocate Reminder API Server
//!
//! HTTP API for advocates to manage their cases, register devices for push
//! reminders and trigger the reminder sweep by hand.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p advocate-api
//! ```
//!
//! The daily sweep normally runs in `advocate-worker`; set
//! `REMINDER_SCHEDULER_ENABLED=true` to run it inside this process instead.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advocate_api::{
    app::{build_router, AppState},
    config::Config,
};
use advocate_shared::{
    auth::build_identity_provider,
    calendar::{Clock, SystemClock},
    store::connect_store,
};
use advocate_worker::{
    push::build_gateway, scheduler::ReminderScheduler, sweep::ReminderSweep,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "advocate_api=debug,advocate_worker=info,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        "Advocate Reminder API v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    let store = connect_store(&config.store).await?;
    let identity = build_identity_provider(&config.identity)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    tracing::info!(
        store = store.backend(),
        identity = identity.name(),
        "Services ready"
    );

    let shutdown = CancellationToken::new();
    let mut state = AppState::new(config.clone(), store.clone(), identity, clock.clone())?;
    let mut scheduler_task = None;

    if config.sweep_enabled() {
        let gateway = build_gateway(&config.push)?;
        let sweep = Arc::new(ReminderSweep::new(store, gateway, clock, &config.reminder)?);
        state = state.with_sweep(sweep.clone());

        if config.scheduler_enabled {
            let scheduler = ReminderScheduler::new(sweep, &config.reminder);
            let token = scheduler.shutdown_token();
            let stop = shutdown.clone();
            tokio::spawn(async move {
                stop.cancelled().await;
                token.cancel();
            });
            scheduler_task = Some(tokio::spawn(async move { scheduler.run().await }));
        }
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("Server listening on http://{}", config.bind_address());

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
            signal.cancel();
        })
        .await?;

    // Let a sweep in progress finish before exiting
    shutdown.cancel();
    if let Some(task) = scheduler_task {
        match task.await {
            Ok(Err(e)) => tracing::error!(error = %e, "Reminder scheduler failed"),
            Err(e) => tracing::error!(error = %e, "Reminder scheduler task panicked"),
            Ok(Ok(())) => {}
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
