//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub presence: PresenceConfig,
    pub bus: BusConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: Environment::Development,
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Gateway listener and connection lifecycle settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Identifies this process on the bus and in the presence ledger
    pub instance_id: String,
    pub heartbeat_interval_ms: u64,
    /// Connections silent for this many intervals are closed
    pub heartbeat_missed_limit: u32,
    pub identify_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
    pub dispatch_workers: usize,
    pub resync_interval_secs: u64,
}

impl GatewayConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which a connection counts as dead
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.heartbeat_missed_limit.max(1)
    }

    pub fn identify_timeout(&self) -> Duration {
        Duration::from_millis(self.identify_timeout_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            instance_id: default_instance_id(),
            heartbeat_interval_ms: 25_000,
            heartbeat_missed_limit: 2,
            identify_timeout_ms: 10_000,
            outbound_queue_capacity: 256,
            dispatch_workers: 4,
            resync_interval_secs: 300,
        }
    }
}

/// Presence tracker settings
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Delay between the last connection closing and going offline
    pub offline_grace_ms: u64,
    pub reconcile_interval_secs: u64,
}

impl PresenceConfig {
    pub fn offline_grace(&self) -> Duration {
        Duration::from_millis(self.offline_grace_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    /// Ledger members are renewed every reconcile pass and survive two misses
    pub fn member_ttl(&self) -> Duration {
        self.reconcile_interval() * 3
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_grace_ms: 15_000,
            reconcile_interval_secs: 60,
        }
    }
}

/// Cross-process broadcast bus settings
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    pub channel_prefix: String,
    /// Publishes buffered while the bus is unreachable
    pub outbox_capacity: usize,
    pub reconnect_step_ms: u64,
    pub reconnect_max_ms: u64,
}

impl BusConfig {
    /// Backoff before reconnect attempt `attempt` (1-based): `min(attempt * step, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = u64::from(attempt)
            .saturating_mul(self.reconnect_step_ms)
            .min(self.reconnect_max_ms);
        Duration::from_millis(ms)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "gateway".to_string(),
            outbox_capacity: 4096,
            reconnect_step_ms: 200,
            reconnect_max_ms: 3000,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

// Default value functions
fn default_app_name() -> String {
    "chat-gateway".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

fn default_redis_max_connections() -> u32 {
    10
}

/// Typed view over a variable source
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        (self.lookup)(key)
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVar(key))
    }

    fn string_or(&self, key: &str, default: impl FnOnce() -> String) -> String {
        (self.lookup)(key).unwrap_or_else(default)
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match (self.lookup)(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key, raw)),
            None => Ok(default),
        }
    }

    /// Like `parse_or`, but zero is rejected; these values size queues,
    /// worker pools and timer periods
    fn nonzero_or<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + Default + PartialEq,
    {
        let value = self.parse_or(key, default)?;
        if value == T::default() {
            return Err(ConfigError::InvalidValue(key, "must be greater than zero".to_string()));
        }
        Ok(value)
    }

    fn parse_required<T: FromStr>(&self, key: &'static str) -> Result<T, ConfigError> {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw))
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let gw = GatewayConfig::default();
        let presence = PresenceConfig::default();
        let bus = BusConfig::default();

        Ok(Self {
            app: AppSettings {
                name: vars.string_or("APP_NAME", default_app_name),
                env: (vars.lookup)("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            gateway: GatewayConfig {
                host: vars.string_or("GATEWAY_HOST", default_host),
                port: vars.parse_required("GATEWAY_PORT")?,
                instance_id: vars.string_or("GATEWAY_INSTANCE_ID", default_instance_id),
                heartbeat_interval_ms: vars
                    .nonzero_or("GATEWAY_HEARTBEAT_INTERVAL_MS", gw.heartbeat_interval_ms)?,
                heartbeat_missed_limit: vars
                    .nonzero_or("GATEWAY_HEARTBEAT_MISSED_LIMIT", gw.heartbeat_missed_limit)?,
                identify_timeout_ms: vars
                    .nonzero_or("GATEWAY_IDENTIFY_TIMEOUT_MS", gw.identify_timeout_ms)?,
                outbound_queue_capacity: vars
                    .nonzero_or("GATEWAY_OUTBOUND_QUEUE_CAPACITY", gw.outbound_queue_capacity)?,
                dispatch_workers: vars.nonzero_or("GATEWAY_DISPATCH_WORKERS", gw.dispatch_workers)?,
                resync_interval_secs: vars
                    .nonzero_or("GATEWAY_RESYNC_INTERVAL_SECS", gw.resync_interval_secs)?,
            },
            presence: PresenceConfig {
                offline_grace_ms: vars
                    .parse_or("PRESENCE_OFFLINE_GRACE_MS", presence.offline_grace_ms)?,
                reconcile_interval_secs: vars.nonzero_or(
                    "PRESENCE_RECONCILE_INTERVAL_SECS",
                    presence.reconcile_interval_secs,
                )?,
            },
            bus: BusConfig {
                channel_prefix: vars.string_or("BUS_CHANNEL_PREFIX", || bus.channel_prefix.clone()),
                outbox_capacity: vars.nonzero_or("BUS_OUTBOX_CAPACITY", bus.outbox_capacity)?,
                reconnect_step_ms: vars.nonzero_or("BUS_RECONNECT_STEP_MS", bus.reconnect_step_ms)?,
                reconnect_max_ms: vars.nonzero_or("BUS_RECONNECT_MAX_MS", bus.reconnect_max_ms)?,
            },
            database: DatabaseConfig {
                url: vars.required("DATABASE_URL")?,
                max_connections: vars
                    .parse_or("DATABASE_MAX_CONNECTIONS", default_max_connections())?,
                min_connections: vars
                    .parse_or("DATABASE_MIN_CONNECTIONS", default_min_connections())?,
            },
            redis: RedisConfig {
                url: vars.required("REDIS_URL")?,
                max_connections: vars
                    .parse_or("REDIS_MAX_CONNECTIONS", default_redis_max_connections())?,
            },
            jwt: JwtConfig {
                secret: vars.required("JWT_SECRET")?,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
