/// Middleware modules for the API server
///
/// - `auth`: Bearer token authentication
/// - `rate_limit`: Per-user token bucket
/// - `security`: Security response headers

pub mod auth;
pub mod rate_limit;
pub mod security;
