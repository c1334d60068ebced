use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vidalink_core::RelayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    // Usar RUST_LOG=debug para mais detalhes
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("VidaLink Relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::from_env();
    match vidalink_relay::serve(config).await {
        Ok(()) => {
            info!("VidaLink Relay exited cleanly.");
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}
