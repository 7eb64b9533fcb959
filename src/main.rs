use anyhow::Result;
use throttle_gate::config::Config;
use throttle_gate::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("throttle_gate={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting throttle gate");
    tracing::info!(
        bind_addr = %config.bind_addr,
        redis = config.redis_url.is_some(),
        rate = ?config.rate,
        algorithm = %config.algorithm,
        failure_policy = %config.failure_policy,
        "Configuration loaded"
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
