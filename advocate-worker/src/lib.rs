//! # Advocate Reminder Worker Library
//!
//! The daily reminder sweep and everything it needs to push notifications.
//!
//! ## Modules
//!
//! - `push`: Push Gateway trait with FCM and mock implementations
//! - `sweep`: The reminder sweep itself
//! - `scheduler`: Daily timer driving the sweep
//! - `config`: Worker settings read from the environment
//!
//! ## Example
//!
//! ```no_run
//! use advocate_shared::calendar::SystemClock;
//! use advocate_shared::store::MemoryStore;
//! use advocate_worker::config::ReminderConfig;
//! use advocate_worker::push::MockGateway;
//! use advocate_worker::sweep::{ReminderSweep, SweepTrigger};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let sweep = ReminderSweep::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockGateway::new()),
//!     Arc::new(SystemClock),
//!     &ReminderConfig::default(),
//! )?;
//! let summary = sweep.run(SweepTrigger::Manual).await?;
//! println!("notified {} cases", summary.notified);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod push;
pub mod scheduler;
pub mod sweep;
