//! FerroFS protocol-engine daemon stub.

use ferrofs_engine::config::EngineConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("FerroFS engine starting...");

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: ffs-engine <device-path> [config.json]");
        std::process::exit(1);
    }

    let device = &args[1];
    let config = match args.get(2) {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            EngineConfig::from_json(&json)?
        }
        None => EngineConfig::default(),
    };

    tracing::info!(device = %device, max_read = config.max_read, "engine configured");

    Ok(())
}
