//! Server configuration.
//!
//! Loaded once from TOML at startup; per-organization overrides are applied
//! through `organization_create` / `organization_update` and stored with the
//! organization itself.

use serde::{Deserialize, Serialize};

use parsec_types::ActiveUsersLimit;

/// Complete server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Accepted clock drift for client timestamps.
    #[serde(default)]
    pub ballpark: BallparkConfig,
    /// Defaults applied to newly created organizations.
    #[serde(default)]
    pub organization: OrganizationDefaults,
    /// Outbound sequester webhook behaviour.
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Maximum accepted block size in bytes.
    #[serde(default = "default_block_max_size")]
    pub block_max_size: u64,
    /// Per-subscriber event queue capacity; slow subscribers past this
    /// bound are dropped.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallparkConfig {
    /// Seconds a client timestamp may be ahead of the server clock.
    #[serde(default = "default_early_offset")]
    pub client_early_offset: f64,
    /// Seconds a client timestamp may lag behind the server clock.
    #[serde(default = "default_late_offset")]
    pub client_late_offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationDefaults {
    #[serde(default)]
    pub active_users_limit: Option<u64>,
    #[serde(default = "default_true")]
    pub user_profile_outsider_allowed: bool,
    #[serde(default)]
    pub allowed_client_agent: AllowedClientAgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_webhook_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Which client flavors an organization accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowedClientAgent {
    NativeOnly,
    #[default]
    NativeOrWeb,
}

impl ServerConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn default_active_users_limit(&self) -> ActiveUsersLimit {
        self.organization.active_users_limit.into()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ballpark: BallparkConfig::default(),
            organization: OrganizationDefaults::default(),
            webhook: WebhookConfig::default(),
            block_max_size: default_block_max_size(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

impl Default for BallparkConfig {
    fn default() -> Self {
        Self {
            client_early_offset: default_early_offset(),
            client_late_offset: default_late_offset(),
        }
    }
}

impl Default for OrganizationDefaults {
    fn default() -> Self {
        Self {
            active_users_limit: None,
            user_profile_outsider_allowed: default_true(),
            allowed_client_agent: AllowedClientAgent::default(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_webhook_attempts(),
            retry_backoff_ms: default_webhook_backoff_ms(),
        }
    }
}

fn default_early_offset() -> f64 {
    300.0
}

fn default_late_offset() -> f64 {
    320.0
}

fn default_true() -> bool {
    true
}

fn default_block_max_size() -> u64 {
    4 * 1024 * 1024
}

fn default_event_queue_capacity() -> usize {
    1024
}

fn default_webhook_attempts() -> u32 {
    3
}

fn default_webhook_backoff_ms() -> u64 {
    500
}
