//! WebAPI - the RPC surface consumed by the UI collaborator
//!
//! ## Responsibilities
//!
//! - Typed JSON routes over every core operation
//! - Request validation before any device traffic
//! - SSE event stream for `recording-finalized` / `stream-dead`
//!
//! Each handler is a thin composition over the shared components; no
//! mutable state lives in this layer.

mod ptz_routes;
mod routes;
mod schedule_routes;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::models::{HealthResponse, ServerInfo};
use crate::state::AppState;

/// Compose the full RPC router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/api/server/info", get(server_info))
        .route("/api/events", get(events))
        .merge(routes::router())
        .merge(ptz_routes::router())
        .merge(schedule_routes::router())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_connected = state.store.encoder_settings.get().await.is_ok();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_connected,
    })
}

/// The collaborator discovers the media port here instead of hard-coding it.
async fn server_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(ServerInfo {
        media_port: state.config.port,
        media_base_url: state.config.media_base_url(),
    })
}

/// Core events as an SSE stream.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let rx = state.hub.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|message| async move {
        match message {
            Ok(message) => Event::default().json_data(&message).ok().map(Ok),
            // A lagged receiver skips what it missed
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
