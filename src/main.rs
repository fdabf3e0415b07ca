//! RA Longevity - analysis, integrity lock and two-key deployment service.

use anyhow::{Context, Result};
use ra_longevity::{
    api::build_app,
    config::{load_env, AppConfig},
    longevity::{ArtifactStore, LongevityService},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env().context("Failed to load configuration")?;
    if config.uses_default_token() {
        warn!("API_BEARER_TOKEN not set; using the development token");
    }

    let store = ArtifactStore::new(&config.artifacts_dir).with_context(|| {
        format!(
            "Failed to open artifact store at {}",
            config.artifacts_dir.display()
        )
    })?;
    info!(
        artifacts_dir = %config.artifacts_dir.display(),
        model = ?config.model.kind,
        "Artifact store ready"
    );

    let service = Arc::new(LongevityService::new(Arc::new(store), config.model.clone()));
    let app = build_app(service, &config);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("API server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ra_longevity=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
