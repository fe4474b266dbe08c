//! CCTV Detector
//!
//! Main entry point for the detector service.

use cctv_detector::{
    ai_client::MoondreamClient,
    detection_cycle::DetectionCycle,
    polling_orchestrator::PollingOrchestrator,
    realtime_hub::RealtimeHub,
    snapshot_service::SnapshotService,
    state::{AppConfig, AppState},
    web_api,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cctv_detector=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CCTV Detector v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env()?;
    tracing::info!(
        camera_url = %config.camera_image_url,
        interval_ms = config.check_interval.as_millis() as u64,
        include_image = config.include_image,
        "Configuration loaded"
    );

    // Initialize components
    let snapshot = SnapshotService::new(
        &config.camera_image_url,
        config.camera_credentials(),
        config.fetch_timeout,
    )?;
    let detector = MoondreamClient::new(
        config.moondream_url.clone(),
        config.moondream_api_key.clone(),
        config.detect_timeout,
    )?;
    let cycle = DetectionCycle::new(snapshot, detector, config.cycle_config());

    let realtime = Arc::new(RealtimeHub::with_buffer(
        config.auth_digest.clone(),
        config.subscriber_buffer,
    ));
    let polling = Arc::new(PollingOrchestrator::new(cycle));

    // One scheduler for the whole process; every event goes to the hub
    {
        let hub = realtime.clone();
        polling
            .start(config.check_interval, move |event| {
                let hub = hub.clone();
                async move {
                    let delivered = hub.publish(&event).await;
                    tracing::debug!(delivered = delivered, "Event published");
                }
            })
            .await;
    }

    let state = AppState {
        config: config.clone(),
        realtime: realtime.clone(),
        polling: polling.clone(),
        started_at: Instant::now(),
    };

    let app = web_api::create_router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        polling.stop().await;
        // Open streams never end on their own; close them so shutdown can finish
        realtime.close_all().await;
    })
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
