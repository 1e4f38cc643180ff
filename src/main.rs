use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gpugate::config::{Config, ModelCatalog};
use gpugate::scheduler::lifecycle::LifecycleController;
use gpugate::scheduler::planner::IlpPlanner;
use gpugate::scheduler::residency::ResidencyTable;
use gpugate::scheduler::spawn::ShellSpawner;
use gpugate::server::{router, AppState};
use gpugate::telemetry::{hostname, NvidiaSmi};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gpugate=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = match Config::load(Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let catalog = Arc::new(ModelCatalog::new(config.models));
    let lifecycle = Arc::new(LifecycleController::new(
        catalog.clone(),
        Arc::new(ResidencyTable::new()),
        Arc::new(NvidiaSmi),
        Arc::new(ShellSpawner),
        Arc::new(IlpPlanner),
    ));
    let state = Arc::new(AppState {
        catalog,
        lifecycle: lifecycle.clone(),
        hostname: hostname(),
        http: reqwest::Client::new(),
        retry_backoff: Duration::from_secs(1),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Gateway listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    // Reclaim VRAM from every backend we spawned.
    lifecycle.shutdown();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
