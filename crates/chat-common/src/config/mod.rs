//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, BusConfig, ConfigError, DatabaseConfig, Environment, GatewayConfig,
    JwtConfig, PresenceConfig, RedisConfig,
};
