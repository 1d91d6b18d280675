use conversation_digest::{api::start_server, AppConfig, AppContext};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env()?;

    info!("Conversation Digest - API Server");
    info!("Port: {}", config.port);

    let context = AppContext::from_config(&config).await?;

    info!("Context initialized, starting API server...");

    start_server(context, config.port).await?;

    Ok(())
}
