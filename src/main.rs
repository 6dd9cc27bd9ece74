//! Entry point: load config, wire dependencies, and run the server.

use driplet::{create_app, AppState, Config};
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("DRIPLET_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load_or_init(Path::new(&config_path))
        .map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.global.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(endpoints = ?config.endpoint_names(), "loaded endpoints");

    let addr = config.bind_addr();
    let state = AppState::new(config);
    let app = create_app(state);

    tracing::info!(addr = %addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
