//! camhub - local camera fleet backend
//!
//! Main entry point: wires the components together and serves the RPC and
//! media routes on one loopback listener.

use camhub::discovery::DiscoveryEngine;
use camhub::encoder::EncoderSelector;
use camhub::media_server;
use camhub::onvif::OnvifClient;
use camhub::realtime_hub::RealtimeHub;
use camhub::recording::RecordingManager;
use camhub::scheduler::ScheduleEngine;
use camhub::store::MetadataStore;
use camhub::stream_supervisor::StreamSupervisor;
use camhub::web_api;
use camhub::{AppConfig, AppState};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
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
                .unwrap_or_else(|_| "camhub=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting camhub v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration and prepare the data layout
    let config = AppConfig::default();
    tracing::info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        ffmpeg = %config.ffmpeg_bin,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.hls_dir()).await?;
    tokio::fs::create_dir_all(&config.recordings_tmp_dir()).await?;
    tokio::fs::create_dir_all(&config.thumbnails_dir()).await?;

    // Stale working directories from a previous run are dead weight
    if let Ok(mut entries) = tokio::fs::read_dir(&config.hls_dir()).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let _ = tokio::fs::remove_dir_all(entry.path()).await;
        }
    }

    // Open the metadata store (migrations run here)
    let store = Arc::new(MetadataStore::open(&config.db_path()).await?);
    tracing::info!(db = %config.db_path().display(), "Metadata store ready");

    // Shared components
    let hub = Arc::new(RealtimeHub::new());
    let onvif = Arc::new(OnvifClient::new());
    let discovery = Arc::new(DiscoveryEngine::new());
    let encoder = Arc::new(EncoderSelector::new(
        config.ffmpeg_bin.clone(),
        store.encoder_settings.clone(),
    ));

    let supervisor = Arc::new(StreamSupervisor::new(
        config.hls_dir(),
        config.ffmpeg_bin.clone(),
        config.media_base_url(),
        onvif.clone(),
        encoder.clone(),
        hub.clone(),
    ));

    let recorder = Arc::new(RecordingManager::new(
        config.ffmpeg_bin.clone(),
        config.recordings_tmp_dir(),
        config.recordings_dir(),
        config.thumbnails_dir(),
        (*store).clone(),
        onvif.clone(),
        encoder.clone(),
        hub.clone(),
        supervisor.clone(),
    ));

    // Register every enabled schedule
    let scheduler = Arc::new(ScheduleEngine::new().await?);
    scheduler.load_all(&store, &recorder).await?;

    let state = AppState {
        config: config.clone(),
        store,
        encoder,
        onvif,
        discovery,
        supervisor: supervisor.clone(),
        recorder: recorder.clone(),
        scheduler,
        hub,
    };

    // One loopback listener: RPC surface plus media routes
    let app = web_api::create_router(state)
        .merge(media_server::router(
            config.hls_dir(),
            config.recordings_dir(),
            config.thumbnails_dir(),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(supervisor, recorder))
        .await?;

    tracing::info!("camhub stopped");
    Ok(())
}

/// Wait for ctrl-c, then stop every session and job inside the global
/// shutdown budget before letting the server exit.
async fn shutdown_signal(supervisor: Arc<StreamSupervisor>, recorder: Arc<RecordingManager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }

    tracing::info!("Shutdown requested, stopping children");
    tokio::join!(supervisor.shutdown(), recorder.shutdown());
}
