/// User model
///
/// Users are keyed by the identity provider's stable identifier (`uid`). A
/// row is created the first time a verified identity reaches the API and is
/// refreshed on later sign-ins.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     uid TEXT PRIMARY KEY,
///     email TEXT,
///     display_name TEXT NOT NULL DEFAULT '',
///     photo_url TEXT,
///     device_tokens TEXT[] NOT NULL DEFAULT '{}',
///     notifications_enabled BOOLEAN NOT NULL DEFAULT TRUE,
///     email_notifications_enabled BOOLEAN NOT NULL DEFAULT TRUE,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     email_verified BOOLEAN NOT NULL DEFAULT FALSE,
///     tokens_valid_after TIMESTAMPTZ,
///     last_login_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL
/// );
/// ```
///
/// Device tokens are a set: registering a token twice keeps a single copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Longest device token accepted from a client
pub const MAX_DEVICE_TOKEN_LEN: usize = 4096;

/// A user of the reminder system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable identifier from the identity provider
    pub uid: String,

    pub email: Option<String>,

    pub display_name: String,

    pub photo_url: Option<String>,

    /// Push registration tokens for the user's devices
    #[serde(skip_serializing)]
    pub device_tokens: Vec<String>,

    /// Whether push reminders are wanted
    pub notifications_enabled: bool,

    pub email_notifications_enabled: bool,

    /// Inactive users are refused at sign-in and skipped by the sweep
    pub is_active: bool,

    pub email_verified: bool,

    /// Credentials issued before this instant are treated as revoked
    #[serde(skip_serializing)]
    pub tokens_valid_after: Option<DateTime<Utc>>,

    pub last_login_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Profile claims taken from a verified identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
}

/// Partial update of profile preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub display_name: Option<String>,
    pub notifications_enabled: Option<bool>,
    pub email_notifications_enabled: Option<bool>,
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.notifications_enabled.is_none()
            && self.email_notifications_enabled.is_none()
    }
}

impl User {
    /// Builds a fresh user record from identity claims
    ///
    /// The display name falls back to the local part of the email address.
    pub fn from_profile(profile: UserProfile, now: DateTime<Utc>) -> Self {
        let display_name = default_display_name(&profile);
        Self {
            uid: profile.uid,
            email: profile.email,
            display_name,
            photo_url: profile.photo_url,
            device_tokens: Vec::new(),
            notifications_enabled: true,
            email_notifications_enabled: true,
            is_active: true,
            email_verified: profile.email_verified,
            tokens_valid_after: None,
            last_login_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refreshes profile fields on sign-in
    ///
    /// Claims that are absent leave the stored value alone.
    pub fn refresh_profile(&mut self, profile: &UserProfile, now: DateTime<Utc>) {
        if profile.email.is_some() {
            self.email = profile.email.clone();
        }
        if let Some(name) = profile.display_name.as_ref().filter(|n| !n.trim().is_empty()) {
            self.display_name = name.trim().to_string();
        }
        if profile.photo_url.is_some() {
            self.photo_url = profile.photo_url.clone();
        }
        self.email_verified = profile.email_verified;
        self.last_login_at = Some(now);
        self.updated_at = now;
    }

    /// Applies a preferences patch
    pub fn apply_preferences(&mut self, prefs: UserPreferences, now: DateTime<Utc>) {
        if let Some(name) = prefs.display_name {
            self.display_name = name.trim().to_string();
        }
        if let Some(v) = prefs.notifications_enabled {
            self.notifications_enabled = v;
        }
        if let Some(v) = prefs.email_notifications_enabled {
            self.email_notifications_enabled = v;
        }
        self.updated_at = now;
    }

    /// Adds a device token unless already registered
    ///
    /// Returns true when the set changed.
    pub fn add_device_token(&mut self, token: &str) -> bool {
        if self.device_tokens.iter().any(|t| t == token) {
            return false;
        }
        self.device_tokens.push(token.to_string());
        true
    }

    /// Removes every listed token, returning how many were dropped
    pub fn remove_device_tokens(&mut self, tokens: &[String]) -> usize {
        let before = self.device_tokens.len();
        self.device_tokens.retain(|t| !tokens.contains(t));
        before - self.device_tokens.len()
    }

    /// Whether the sweep may push to this user
    pub fn accepts_push(&self) -> bool {
        self.is_active && self.notifications_enabled && !self.device_tokens.is_empty()
    }
}

fn default_display_name(profile: &UserProfile) -> String {
    if let Some(name) = profile.display_name.as_ref().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    profile
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or("User")
        .to_string()
}

/// Short, non-reversible label for a device token
///
/// Raw tokens are credentials for pushing to a device and never appear in
/// logs; this fingerprint is logged instead.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Checks the shape of a device token supplied by a client
pub fn validate_device_token(token: &str) -> Result<(), &'static str> {
    if token.is_empty() {
        return Err("Device token is required");
    }
    if token.len() > MAX_DEVICE_TOKEN_LEN {
        return Err("Device token is too long");
    }
    if token.chars().any(char::is_whitespace) {
        return Err("Device token must not contain whitespace");
    }
    Ok(())
}
