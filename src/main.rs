//! postbird - run an endpoint with a few built-in functions
//!
//! Mode, addresses and transport come from `POSTBIRD_CONFIG` and the
//! `POSTBIRD_*` environment overrides.

use postbird::{Config, Endpoint, FunctionRegistry, Mode};
use tracing_subscriber::EnvFilter;

fn builtin_functions() -> FunctionRegistry {
    FunctionRegistry::new()
        .with("echo", |message: String| {
            tracing::info!("echo: {}", message);
            message
        })
        .with("add", |a: i64, b: i64| {
            let sum = a + b;
            tracing::info!("add: {} + {} = {}", a, b, sum);
            sum
        })
        .with("ping", || {
            tracing::info!("ping");
            "pong"
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if POSTBIRD_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("POSTBIRD_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting postbird {}", config.mode);
    tracing::info!("  Transport: {}", config.transport);
    match config.mode {
        Mode::Server => tracing::info!("  Bind address: {}", config.network.bind_endpoint()),
        Mode::Client => tracing::info!("  Server address: {}", config.network.remote_endpoint()),
    }

    let endpoint = Endpoint::start(config, builtin_functions()).await?;

    if endpoint.mode() == Mode::Client {
        endpoint.call("ping", vec![]).await?;
    }

    endpoint
        .run_until(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal, stopping...");
        })
        .await?;

    tracing::info!("Stopped");
    Ok(())
}
