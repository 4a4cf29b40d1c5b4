/// Configuration sections shared by the API server and the worker
///
/// Each section loads itself from environment variables. Binaries call
/// `dotenvy::dotenv()` once before loading so a local `.env` file works in
/// development.
///
/// # Environment Variables
///
/// - `STORE_BACKEND`: `postgres` (default) or `memory`
/// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`: see [`DatabaseConfig`]
/// - `IDENTITY_PROVIDER`: `firebase` (default) or `local`
/// - `FIREBASE_PROJECT_ID`: required for the Firebase provider
/// - `LOCAL_JWT_SECRET`: required for the local provider (at least 32 characters)

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::db::pool::DatabaseConfig;

/// Minimum length of the local HS256 secret
pub const MIN_LOCAL_SECRET_LEN: usize = 32;

/// Reads `key`, falling back to `default` when unset, and parses it
pub fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        _ => Ok(default),
    }
}

/// Reads a boolean flag (`1/0`, `true/false`, `yes/no`, `on/off`)
pub fn env_flag(key: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_flag(&raw)
            .ok_or_else(|| anyhow::anyhow!("{} must be a boolean, got {:?}", key, raw)),
        _ => Ok(default),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Which Record Store implementation to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {:?}", other)),
        }
    }
}

/// Record Store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Only read for the PostgreSQL backend
    pub database: DatabaseConfig,
}

impl StoreConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = env_or("STORE_BACKEND", StoreBackend::Postgres)?;
        let database = match backend {
            StoreBackend::Postgres => DatabaseConfig::from_env()?,
            StoreBackend::Memory => DatabaseConfig::default(),
        };
        Ok(Self { backend, database })
    }

    /// In-memory store, used by tests
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database: DatabaseConfig::default(),
        }
    }
}

/// Which identity provider verifies bearer tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityBackend {
    #[default]
    Firebase,
    Local,
}

impl FromStr for IdentityBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "firebase" => Ok(IdentityBackend::Firebase),
            "local" => Ok(IdentityBackend::Local),
            other => Err(format!("unknown identity provider {:?}", other)),
        }
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Default)]
pub struct IdentityConfig {
    pub provider: IdentityBackend,

    /// Firebase project ID (audience of the ID tokens)
    pub firebase_project_id: Option<String>,

    /// Shared HS256 secret for the local provider
    ///
    /// Must be kept secret and at least 32 bytes long.
    pub local_jwt_secret: Option<String>,
}

impl IdentityConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let provider = env_or("IDENTITY_PROVIDER", IdentityBackend::Firebase)?;
        let firebase_project_id = env::var("FIREBASE_PROJECT_ID").ok().filter(|v| !v.is_empty());
        let local_jwt_secret = env::var("LOCAL_JWT_SECRET").ok().filter(|v| !v.is_empty());

        let config = Self {
            provider,
            firebase_project_id,
            local_jwt_secret,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the selected provider has what it needs
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.provider {
            IdentityBackend::Firebase => {
                if self.firebase_project_id.is_none() {
                    anyhow::bail!("FIREBASE_PROJECT_ID is required when IDENTITY_PROVIDER=firebase");
                }
            }
            IdentityBackend::Local => match &self.local_jwt_secret {
                None => anyhow::bail!("LOCAL_JWT_SECRET is required when IDENTITY_PROVIDER=local"),
                Some(secret) if secret.len() < MIN_LOCAL_SECRET_LEN => {
                    anyhow::bail!(
                        "LOCAL_JWT_SECRET must be at least {} characters long",
                        MIN_LOCAL_SECRET_LEN
                    )
                }
                Some(_) => {}
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert_eq!("PostgreSQL".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert!("mongo".parse::<StoreBackend>().is_err());
        assert_eq!("local".parse::<IdentityBackend>().unwrap(), IdentityBackend::Local);
    }

    #[test]
    fn test_env_or_default_when_unset() {
        let value: u32 = env_or("ADVOCATE_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
        assert!(env_flag("ADVOCATE_TEST_SURELY_UNSET_FLAG", true).unwrap());
    }

    #[test]
    fn test_identity_validation() {
        let short = IdentityConfig {
            provider: IdentityBackend::Local,
            firebase_project_id: None,
            local_jwt_secret: Some("too-short".to_string()),
        };
        assert!(short.validate().is_err());

        let ok = IdentityConfig {
            provider: IdentityBackend::Local,
            firebase_project_id: None,
            local_jwt_secret: Some("a-local-development-secret-of-32+chars".to_string()),
        };
        assert!(ok.validate().is_ok());

        let firebase = IdentityConfig {
            provider: IdentityBackend::Firebase,
            ..Default::default()
        };
        assert!(firebase.validate().is_err());
    }
}
