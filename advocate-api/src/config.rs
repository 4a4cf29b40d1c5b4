/// Configuration management for the API server
///
/// # Environment Variables
///
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `API_PRODUCTION`: Enables HSTS (default: false)
/// - `CORS_ORIGINS`: Comma-separated allowed origins, `*` for any (default: `*`)
/// - `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_WINDOW_SECS`: per-user request budget
///   (default: 100 requests per 900 seconds)
/// - `REMINDER_SCHEDULER_ENABLED`: also run the daily sweep in this process
///   (default: false, the worker binary normally does it)
/// - `REMINDER_MANUAL_TRIGGER`: expose `POST /api/reminders/run` (default: true)
///
/// Store, identity, reminder and push settings are documented with their
/// sections in `advocate_shared::config` and `advocate_worker::config`.
///
/// # Example
///
/// ```no_run
/// use advocate_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use std::env;

use advocate_shared::config::{env_flag, env_or, IdentityConfig, StoreConfig};
use advocate_worker::config::{PushConfig, ReminderConfig};

/// Complete application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api: ApiConfig,
    pub store: StoreConfig,
    pub identity: IdentityConfig,
    pub rate_limit: RateLimitConfig,
    pub reminder: ReminderConfig,
    pub push: PushConfig,

    /// Run the daily sweep inside the API process
    pub scheduler_enabled: bool,

    /// Expose the manual sweep trigger
    pub manual_trigger_enabled: bool,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Whether the server runs behind HTTPS in production
    pub production: bool,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            production: false,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Per-user request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window (bucket capacity)
    pub requests: u32,

    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 15 * 60,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing
    /// - Environment variables have invalid values
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = ApiConfig::default();
        let cors_origins = env::var("CORS_ORIGINS")
            .ok()
            .map(|raw| parse_origins(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.cors_origins);

        let api = ApiConfig {
            host: env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port)?,
            production: env_flag("API_PRODUCTION", defaults.production)?,
            cors_origins,
        };

        let rate_limit = RateLimitConfig {
            requests: env_or("RATE_LIMIT_REQUESTS", RateLimitConfig::default().requests)?,
            window_secs: env_or("RATE_LIMIT_WINDOW_SECS", RateLimitConfig::default().window_secs)?,
        };
        if rate_limit.requests == 0 || rate_limit.window_secs == 0 {
            anyhow::bail!("RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW_SECS must be positive");
        }

        let scheduler_enabled = env_flag("REMINDER_SCHEDULER_ENABLED", false)?;
        let manual_trigger_enabled = env_flag("REMINDER_MANUAL_TRIGGER", true)?;

        // Push credentials are only needed when this process can run a sweep
        let push = if scheduler_enabled || manual_trigger_enabled {
            PushConfig::from_env()?
        } else {
            PushConfig::default()
        };

        Ok(Self {
            api,
            store: StoreConfig::from_env()?,
            identity: IdentityConfig::from_env()?,
            rate_limit,
            reminder: ReminderConfig::from_env()?,
            push,
            scheduler_enabled,
            manual_trigger_enabled,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Whether this process needs a reminder sweep at all
    pub fn sweep_enabled(&self) -> bool {
        self.scheduler_enabled || self.manual_trigger_enabled
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let config = Config {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins(" https://a.example , https://b.example,,"),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(parse_origins(" , ").is_empty());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.rate_limit.requests, 100);
        assert_eq!(config.api.cors_origins, vec!["*".to_string()]);
        assert!(!config.sweep_enabled());
    }
}
