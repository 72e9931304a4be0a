use anyhow::Context;
use peercall::config::Config;
use peercall::interface::relay::{init_metrics, RelayServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable naming an optional TOML config file
const CONFIG_PATH_ENV: &str = "PEERCALL_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var(CONFIG_PATH_ENV).ok();
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting peercall signaling relay");
    info!("Configuration loaded: {:?}", config);

    let mut server = RelayServer::new(config.relay.channel_capacity);
    match init_metrics() {
        Ok(handle) => server = server.with_metrics(handle),
        Err(e) => warn!("Metrics exporter unavailable: {}", e),
    }

    let bind = format!("{}:{}", config.relay.bind_address, config.relay.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    let server_handle = tokio::spawn(server.serve(listener));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();
    info!("peercall stopped");
    Ok(())
}
