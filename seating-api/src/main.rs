use seating_api::{app, worker::spawn_workers, AppState};
use seating_store::app_config::{Config, TenantOverrides};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seating_api=debug,seating_hold=debug,seating_pricing=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load()?;

    // Single-tenant deployments pass their overrides as a JSON object.
    if let Ok(raw) = std::env::var("TENANT_OVERRIDES") {
        let overrides = TenantOverrides::from_json(&serde_json::from_str(&raw)?)?;
        tracing::info!(?overrides, "Applying tenant overrides");
        config = config.with_overrides(&overrides)?;
    }

    tracing::info!("Starting seating service on port {}", config.server.port);

    let state = AppState::connect(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = spawn_workers(&state, &config, shutdown_rx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    tracing::info!("Shutting down background workers");
    let _ = shutdown_tx.send(true);
    for worker in workers {
        worker.await?;
    }

    Ok(())
}
