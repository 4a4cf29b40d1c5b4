//! # Advocate Reminder Shared Library
//!
//! Types and services shared by the API server and the reminder worker.
//!
//! ## Module Organization
//!
//! - `models`: Cases and users
//! - `store`: Record Store traits with PostgreSQL and in-memory backends
//! - `db`: Connection pool and migrations
//! - `auth`: Identity providers and request authentication
//! - `calendar`: Injectable clock and calendar-day arithmetic
//! - `config`: Configuration sections read from the environment

pub mod auth;
pub mod calendar;
pub mod config;
pub mod db;
pub mod models;
pub mod store;

/// Current version of the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
