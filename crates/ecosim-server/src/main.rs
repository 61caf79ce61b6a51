//! Host process for the grassland ecosystem simulator.

mod api;
mod driver;
mod telemetry;

use anyhow::Result;
use ecosim_core::{EcosystemConfig, ServerConfig};
use ecosim_world::ControlSurface;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env();

    telemetry::init_telemetry(config.otel_endpoint.as_deref())?;

    info!("Starting ecosim server on {}:{}", config.bind_address, config.port);

    let ecosystem = EcosystemConfig {
        seed: config.seed,
        ..Default::default()
    };
    let mut surface = ControlSurface::new(ecosystem)?;
    if config.autostart {
        surface.start();
    }

    let (driver, driver_task) = driver::spawn(surface);

    let app = api::router(api::AppState { driver })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last driver handle, so the driver now winds down
    driver_task.await?;

    telemetry::shutdown_telemetry();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
