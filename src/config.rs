//! Configuration management for Customs.
//!
//! Values are layered in increasing precedence: built-in defaults, an optional
//! YAML file, `CUSTOMS__SECTION__KEY` environment variables, and finally the
//! flat legacy variable names (`MAX_VERIFY_CODES`, ...) that existing
//! deployments already set.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{CustomsError, Result};

/// Prefix for structured environment overrides.
const ENV_PREFIX: &str = "CUSTOMS";

/// Legacy environment variable names and the config keys they override.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("MAX_VERIFY_CODES", "limits.max_verify_codes"),
    ("RATE_LIMIT_INTERVAL_SECONDS", "limits.rate_limit_interval_secs"),
    ("IP_RATE_LIMIT_INTERVAL_SECONDS", "limits.ip_rate_limit_interval_secs"),
    (
        "IP_RATE_LIMIT_BAN_DURATION_SECONDS",
        "limits.ip_rate_limit_ban_duration_secs",
    ),
    ("MAX_DISTINCT_EMAILS_PER_IP", "limits.max_distinct_emails_per_ip"),
];

/// Main configuration for the Customs service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomsConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Policy thresholds
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Whether the administrative `/reset` route is mounted
    #[serde(default)]
    pub allow_reset: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            allow_reset: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7000))
}

/// Thresholds consumed by the policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Attempts allowed per `(email, action)` window
    #[serde(default = "default_max_verify_codes")]
    pub max_verify_codes: u64,

    /// Length of the per-email repeat window
    #[serde(default = "default_interval_secs")]
    pub rate_limit_interval_secs: u64,

    /// Length of the per-IP distinct-issuance window
    #[serde(default = "default_interval_secs")]
    pub ip_rate_limit_interval_secs: u64,

    /// How long an IP stays banned once it exceeds the distinct cap
    #[serde(default = "default_interval_secs")]
    pub ip_rate_limit_ban_duration_secs: u64,

    /// Distinct emails allowed per `(ip, action)` window.
    /// Falls back to `max_verify_codes` when unset.
    #[serde(default)]
    pub max_distinct_emails_per_ip: Option<u64>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_verify_codes: default_max_verify_codes(),
            rate_limit_interval_secs: default_interval_secs(),
            ip_rate_limit_interval_secs: default_interval_secs(),
            ip_rate_limit_ban_duration_secs: default_interval_secs(),
            max_distinct_emails_per_ip: None,
        }
    }
}

fn default_max_verify_codes() -> u64 {
    10
}

fn default_interval_secs() -> u64 {
    900
}

impl LimitsConfig {
    /// Effective distinct-email cap.
    pub fn max_distinct(&self) -> u64 {
        self.max_distinct_emails_per_ip
            .unwrap_or(self.max_verify_codes)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_interval_secs)
    }

    pub fn ip_rate_limit_interval(&self) -> Duration {
        Duration::from_secs(self.ip_rate_limit_interval_secs)
    }

    pub fn ban_duration(&self) -> Duration {
        Duration::from_secs(self.ip_rate_limit_ban_duration_secs)
    }
}

/// Which counter store implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Single-process store
    Memory,
    /// Shared Redis store
    Redis,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix for every key this service writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for a single store call in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval of the expired-entry sweep (memory backend only)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "customs".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_sweep_interval() -> u64 {
    60
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl CustomsConfig {
    /// Load configuration from an optional file plus the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        Self::load_with_env(path, std::env::vars().collect())
    }

    /// Load configuration from an optional file plus the given environment.
    pub fn load_with_env(path: Option<&str>, env: HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        for (var, key) in LEGACY_ENV {
            builder = builder.set_override_option(*key, env.get(*var).cloned())?;
        }

        let config: CustomsConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds the store cannot represent.
    ///
    /// A zero-length window or ban would expire on creation.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("limits.rate_limit_interval_secs", self.limits.rate_limit_interval_secs),
            ("limits.ip_rate_limit_interval_secs", self.limits.ip_rate_limit_interval_secs),
            (
                "limits.ip_rate_limit_ban_duration_secs",
                self.limits.ip_rate_limit_ban_duration_secs,
            ),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(CustomsError::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.store.timeout_ms == 0 {
            return Err(CustomsError::Config(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(CustomsError::Config(
                "store.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
