mod auth;
mod config;
mod dto;
mod error;
mod routes;
mod state;

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use vmo_infra::LeaseRegistry;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    // Background operations outlive the requests that start them
    let leases = LeaseRegistry::new();
    let orchestrator =
        vmo_infra::build_orchestrator(leases.clone()).expect("failed to build orchestrator");
    tracing::info!(
        architectures = ?orchestrator.supported_architectures(),
        "orchestrator ready"
    );

    let state = AppState {
        orchestrator,
        config: config.clone(),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, "starting VM orchestration API");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .expect("server error");

    leases.shutdown(config.shutdown_grace).await;
}
