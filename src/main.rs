//! Places proxy - admission-controlled caching proxy for a places API
//!
//! Serves autocomplete and place-details lookups, answering from an in-memory
//! cache when possible and shielding the provider with global and per-client
//! rate limits.

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use places_proxy::cli::Cli;
use places_proxy::config::{LogFormat, ProxyConfig};
use places_proxy::http::{router, AppState};
use places_proxy::pipeline::Pipeline;
use places_proxy::sweeper::SweepHandle;

/// Installs the global subscriber; `RUST_LOG` overrides the default filter
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Resolves when the process receives Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match ProxyConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    init_tracing(config.log_format);

    let pipeline = Arc::new(Pipeline::from_config(&config)?);
    let sweeper = SweepHandle::spawn(Arc::clone(pipeline.limiter()), config.cleanup_interval);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        cache_capacity = config.cache_capacity,
        upstream_timeout_ms = config.upstream_timeout.as_millis() as u64,
        "places proxy listening"
    );

    let app = router(AppState::new(pipeline, config.trust_forwarded_for));
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    tracing::info!("places proxy stopped");
    Ok(())
}
