//! Camera, discovery, stream, recording and encoder routes

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;

use crate::encoder::detect;
use crate::error::Result;
use crate::models::ApiResponse;
use crate::recording::RecordingOptions;
use crate::state::AppState;
use crate::store::{LiveRefs, NewCamera, UpdateEncoderSettings};
use crate::uvc;

pub fn router() -> Router<AppState> {
    Router::new()
        // Cameras
        .route("/api/cameras", get(get_cameras))
        .route("/api/cameras", post(add_camera))
        .route("/api/cameras/:id", delete(delete_camera))
        // Discovery
        .route("/api/discovery/scan", post(discover_cameras))
        .route("/api/discovery/scan", delete(cancel_discovery))
        .route("/api/uvc/devices", get(uvc_devices))
        // Streams
        .route("/api/cameras/:id/stream/start", post(start_stream))
        .route("/api/cameras/:id/stream/stop", post(stop_stream))
        // Recordings
        .route("/api/cameras/:id/recording/start", post(start_recording))
        .route("/api/cameras/:id/recording/stop", post(stop_recording))
        .route("/api/recordings", get(get_recordings))
        .route("/api/recordings/cameras", get(get_recording_cameras))
        .route("/api/recordings/:id", delete(delete_recording))
        // GPU & encoder
        .route("/api/encoder/gpu", get(detect_gpu))
        .route("/api/encoder/settings", get(get_encoder_settings))
        .route("/api/encoder/settings", put(update_encoder_settings))
}

// ========================================
// Camera handlers
// ========================================

async fn get_cameras(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.store.cameras.list().await?;
    Ok(Json(ApiResponse::success(cameras)))
}

async fn add_camera(
    State(state): State<AppState>,
    Json(new): Json<NewCamera>,
) -> Result<impl IntoResponse> {
    let camera = state.store.cameras.insert(&new).await?;
    tracing::info!(camera_id = camera.id, name = %camera.name, kind = ?camera.kind, "Camera added");
    Ok(Json(camera))
}

/// Deletion cascades: live stream and recording are torn down first, the
/// camera's schedule registrations dropped, then the gated row delete runs.
async fn delete_camera(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = state
        .store
        .cameras
        .get(id)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound(format!("Camera {id} not found")))?;

    let schedules = state.store.schedules.list().await?;
    for schedule in schedules.iter().filter(|s| s.camera_id == id) {
        state.scheduler.unregister(schedule.id).await;
    }

    state.supervisor.stop(id).await?;
    state.recorder.abort(id).await?;

    state
        .store
        .delete_camera(
            id,
            LiveRefs {
                streaming: state.supervisor.is_streaming(id).await,
                recording: state.recorder.is_recording(id).await,
            },
        )
        .await?;

    tracing::info!(camera_id = id, name = %camera.name, "Camera deleted");
    Ok(Json(json!({ "success": true })))
}

// ========================================
// Discovery handlers
// ========================================

async fn discover_cameras(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let devices = state.discovery.scan().await?;
    Ok(Json(ApiResponse::success(devices)))
}

async fn cancel_discovery(State(state): State<AppState>) -> impl IntoResponse {
    state.discovery.cancel().await;
    Json(json!({ "success": true }))
}

async fn uvc_devices() -> impl IntoResponse {
    let devices = uvc::probe_devices().await;
    Json(ApiResponse::success(devices))
}

// ========================================
// Stream handlers
// ========================================

async fn start_stream(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = state
        .store
        .cameras
        .get(id)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound(format!("Camera {id} not found")))?;

    let stream_url = state.supervisor.start(&camera).await?;
    Ok(Json(json!({ "streamUrl": stream_url })))
}

async fn stop_stream(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.supervisor.stop(id).await?;
    Ok(Json(json!({ "success": true })))
}

// ========================================
// Recording handlers
// ========================================

async fn start_recording(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    options: Option<Json<RecordingOptions>>,
) -> Result<impl IntoResponse> {
    let camera = state
        .store
        .cameras
        .get(id)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound(format!("Camera {id} not found")))?;

    let options = options.map(|Json(o)| o).unwrap_or_default();
    state.recorder.start(&camera, options).await?;
    Ok(Json(json!({ "success": true })))
}

async fn stop_recording(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let recording_id = state.recorder.stop(id).await?;
    Ok(Json(json!({ "success": true, "recordingId": recording_id })))
}

async fn get_recordings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let recordings = state.recorder.list().await?;
    Ok(Json(ApiResponse::success(recordings)))
}

async fn get_recording_cameras(State(state): State<AppState>) -> impl IntoResponse {
    let camera_ids = state.recorder.recording_cameras().await;
    Json(camera_ids)
}

async fn delete_recording(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.recorder.delete(id).await?;
    Ok(Json(json!({ "success": true })))
}

// ========================================
// GPU & encoder handlers
// ========================================

async fn detect_gpu(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let capabilities = detect::detect_gpu(&state.config.ffmpeg_bin).await?;
    Ok(Json(capabilities))
}

async fn get_encoder_settings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let settings = state.store.encoder_settings.get().await?;
    Ok(Json(settings))
}

async fn update_encoder_settings(
    State(state): State<AppState>,
    Json(patch): Json<UpdateEncoderSettings>,
) -> Result<impl IntoResponse> {
    let settings = state.store.encoder_settings.update(&patch).await?;
    // New transcoder children pick the fresh selection
    state.encoder.invalidate().await;
    tracing::info!(mode = %settings.encoder_mode, "Encoder settings updated");
    Ok(Json(settings))
}
