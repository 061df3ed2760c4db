//! # chat-common
//!
//! Shared utilities including configuration, error handling, identity verification, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{Claims, JwtVerifier};
pub use config::{
    AppConfig, AppSettings, BusConfig, ConfigError, DatabaseConfig, Environment, GatewayConfig,
    JwtConfig, PresenceConfig, RedisConfig,
};
pub use error::{AppError, AppResult};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
