use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageBackend,
    #[serde(default)]
    pub rate_limit: RateLimitSetting,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub effects: EffectsConfig,
    /// Static resource catalog, used by the in-memory backend.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub dbname: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

/// Named rate-limit budgets, picked by endpoint sensitivity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitPreset {
    Strict,
    Standard,
    Relaxed,
    Auth,
    Otp,
    Push,
}

impl RateLimitPreset {
    pub fn name(&self) -> &'static str {
        match self {
            RateLimitPreset::Strict => "strict",
            RateLimitPreset::Standard => "standard",
            RateLimitPreset::Relaxed => "relaxed",
            RateLimitPreset::Auth => "auth",
            RateLimitPreset::Otp => "otp",
            RateLimitPreset::Push => "push",
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        let (max_requests, window_secs) = match self {
            RateLimitPreset::Strict => (10, 60),
            RateLimitPreset::Standard => (60, 60),
            RateLimitPreset::Relaxed => (120, 60),
            RateLimitPreset::Auth => (5, 60),
            RateLimitPreset::Otp => (3, 300),
            RateLimitPreset::Push => (100, 60),
        };
        RateLimitConfig {
            window_secs,
            max_requests,
            prefix: self.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
    pub prefix: String,
}

impl RateLimitConfig {
    pub fn new(prefix: impl Into<String>, max_requests: u32, window: Duration) -> Self {
        Self {
            window_secs: window.as_secs(),
            max_requests,
            prefix: prefix.into(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Either a preset name (`rate_limit: strict`) or an explicit budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RateLimitSetting {
    Preset(RateLimitPreset),
    Custom(RateLimitConfig),
}

impl Default for RateLimitSetting {
    fn default() -> Self {
        RateLimitSetting::Preset(RateLimitPreset::Standard)
    }
}

impl RateLimitSetting {
    pub fn resolve(&self) -> RateLimitConfig {
        match self {
            RateLimitSetting::Preset(preset) => preset.config(),
            RateLimitSetting::Custom(config) => config.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// How long a request may wait for its slot before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EffectsConfig {
    #[serde(default = "default_effect_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_push_url")]
    pub push_url: String,
    #[serde(default)]
    pub push_access_token: Option<String>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_effect_timeout_ms(),
            push_url: default_push_url(),
            push_access_token: None,
        }
    }
}

impl EffectsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    /// bearer token -> user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_db_port() -> u16 {
    5432
}

fn default_pool_size() -> u32 {
    5
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_effect_timeout_ms() -> u64 {
    3_000
}

fn default_push_url() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}

impl Config {
    pub fn load(filename: impl AsRef<Path>) -> Result<Self, Error> {
        let config = fs::read_to_string(filename.as_ref()).map_err(|_| Error::ConfigReadError)?;
        Self::from_yaml(&config)
    }

    pub fn from_yaml(s: &str) -> Result<Self, Error> {
        let config: Self =
            serde_yaml::from_str(s).map_err(|e| Error::ConfigParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let limit = self.rate_limit.resolve();
        if limit.window_secs == 0 {
            return Err(Error::ConfigParseError(
                "rate_limit.window_secs must be greater than 0".into(),
            ));
        }
        if limit.max_requests == 0 {
            return Err(Error::ConfigParseError(
                "rate_limit.max_requests must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl DbConfig {
    pub fn server_url(&self) -> String {
        if self.password.is_empty() {
            format!("postgres://{}@{}:{}", self.user, self.host, self.port)
        } else {
            format!(
                "postgres://{}:{}@{}:{}",
                self.user, self.password, self.host, self.port
            )
        }
    }

    pub fn url(&self) -> String {
        format!("{}/{}", self.server_url(), self.dbname)
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self, https: bool) -> String {
        if https {
            format!("https://{}", self.addr())
        } else {
            format!("http://{}", self.addr())
        }
    }
}
