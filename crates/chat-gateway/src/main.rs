//! Gateway binary
//!
//! ```bash
//! GATEWAY_PORT=8081 DATABASE_URL=... REDIS_URL=... JWT_SECRET=... cargo run -p chat-gateway
//! ```
//!
//! Everything else has a default; see `AppConfig::from_env`.

use anyhow::Context;
use chat_common::{try_init_tracing_with_config, AppConfig, TracingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;

    // A second subscriber (tests, embedding) is not fatal
    if let Err(e) = try_init_tracing_with_config(&TracingConfig::for_environment(config.app.env)) {
        eprintln!("tracing not initialised: {e}");
    }

    tracing::info!(
        env = ?config.app.env,
        instance_id = %config.gateway.instance_id,
        address = %config.gateway.address(),
        "Starting gateway"
    );

    chat_gateway::run(config).await.map_err(|e| {
        tracing::error!(error = %e, code = e.error_code(), "Gateway exited with error");
        anyhow::Error::new(e)
    })
}
