//! PTZ and camera time routes
//!
//! PTZ velocity components outside [-1, 1] are rejected here, before any
//! SOAP leaves the host.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::onvif::OnvifDateTime;
use crate::state::AppState;
use crate::store::{Camera, CameraKind};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/cameras/:id/ptz/capabilities", get(check_ptz_capabilities))
        .route("/api/cameras/:id/ptz/move", post(move_ptz))
        .route("/api/cameras/:id/ptz/stop", post(stop_ptz))
        .route("/api/cameras/:id/time", get(get_camera_time))
        .route("/api/cameras/:id/time/sync", post(sync_camera_time))
}

#[derive(Debug, Deserialize)]
pub struct PtzMovement {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub zoom: Option<f32>,
    /// Auto-stop after this many milliseconds
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct PtzCapabilities {
    pub supported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<PtzCapabilityDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PtzCapabilityDetails {
    pub has_pan_tilt: bool,
    pub has_zoom: bool,
}

#[derive(Debug, Serialize)]
pub struct PtzResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraTimeInfo {
    pub camera_time: OnvifDateTime,
    pub server_time: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSyncResult {
    pub success: bool,
    pub before_time: OnvifDateTime,
    pub server_time: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn onvif_camera(state: &AppState, id: i64) -> Result<Camera> {
    let camera = state
        .store
        .cameras
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Camera {id} not found")))?;

    if camera.kind != CameraKind::Onvif {
        return Err(Error::InvalidInput(format!(
            "Camera {id} is not an ONVIF camera"
        )));
    }
    Ok(camera)
}

// ========================================
// PTZ handlers
// ========================================

async fn check_ptz_capabilities(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = state
        .store
        .cameras
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Camera {id} not found")))?;

    if camera.kind != CameraKind::Onvif {
        return Ok(Json(PtzCapabilities {
            supported: false,
            capabilities: None,
        }));
    }

    match state.onvif.get_ptz_service_url(&camera).await {
        Ok(_) => Ok(Json(PtzCapabilities {
            supported: true,
            capabilities: Some(PtzCapabilityDetails {
                has_pan_tilt: true,
                has_zoom: true,
            }),
        })),
        Err(_) => Ok(Json(PtzCapabilities {
            supported: false,
            capabilities: None,
        })),
    }
}

/// Magnitudes are validated before any SOAP is issued.
fn validate_magnitude(name: &str, value: Option<f32>) -> Result<f32> {
    let value = value.unwrap_or(0.0);
    if !(-1.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(Error::InvalidInput(format!(
            "PTZ {name} must be within [-1, 1], got {value}"
        )));
    }
    Ok(value)
}

async fn move_ptz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(movement): Json<PtzMovement>,
) -> Result<impl IntoResponse> {
    let x = validate_magnitude("x", movement.x)?;
    let y = validate_magnitude("y", movement.y)?;
    let zoom = validate_magnitude("zoom", movement.zoom)?;

    let camera = onvif_camera(&state, id).await?;
    state.onvif.continuous_move(&camera, x, y, zoom).await?;

    // Bounded nudges stop themselves
    if let Some(timeout_ms) = movement.timeout {
        let onvif = state.onvif.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if let Err(e) = onvif.stop(&camera).await {
                tracing::warn!(camera_id = id, error = %e, "PTZ auto-stop failed");
            }
        });
    }

    Ok(Json(PtzResult {
        success: true,
        message: "Moving".to_string(),
    }))
}

async fn stop_ptz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = onvif_camera(&state, id).await?;
    state.onvif.stop(&camera).await?;

    Ok(Json(PtzResult {
        success: true,
        message: "Stopped".to_string(),
    }))
}

// ========================================
// Time sync handlers
// ========================================

async fn get_camera_time(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = onvif_camera(&state, id).await?;
    let camera_time = state.onvif.get_system_date_time(&camera).await?;

    Ok(Json(CameraTimeInfo {
        camera_time,
        server_time: Utc::now().to_rfc3339(),
    }))
}

/// Write the host's UTC instant to the camera clock, verify, and report the
/// drift that was corrected. An active stream is restarted because many
/// cameras drop their RTSP sessions when the clock jumps.
async fn sync_camera_time(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = onvif_camera(&state, id).await?;

    let was_streaming = state.supervisor.is_streaming(id).await;
    let before = state.onvif.get_system_date_time(&camera).await?;
    let server_time = Utc::now();

    state
        .onvif
        .set_system_date_time(&camera, &OnvifDateTime::from_chrono(&server_time))
        .await?;

    // Give the camera a moment to apply the new clock
    tokio::time::sleep(Duration::from_millis(500)).await;

    let after = match state.onvif.get_system_date_time(&camera).await {
        Ok(dt) => Some(dt),
        Err(e) => {
            tracing::warn!(camera_id = id, error = %e, "Could not verify time after sync");
            None
        }
    };

    if was_streaming {
        tracing::info!(camera_id = id, "Restarting stream after time sync");
        if let Err(e) = state.supervisor.stop(id).await {
            tracing::warn!(camera_id = id, error = %e, "Stream stop after sync failed");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Err(e) = state.supervisor.start(&camera).await {
            tracing::warn!(camera_id = id, error = %e, "Stream restart after sync failed");
        }
    }

    let before_chrono = before
        .to_chrono()
        .ok_or_else(|| Error::Protocol("Camera reported an invalid clock value".into()))?;
    let drift_seconds = server_time
        .signed_duration_since(before_chrono)
        .num_seconds();

    let message = match after {
        Some(after_dt) => {
            let after_chrono = after_dt
                .to_chrono()
                .ok_or_else(|| Error::Protocol("Camera reported an invalid clock value".into()))?;
            let residual = Utc::now().signed_duration_since(after_chrono).num_seconds();

            if residual.abs() < 5 {
                format!("Camera time synchronized (adjusted by {drift_seconds}s, verified)")
            } else {
                format!(
                    "Camera time may not have been set (before drift {drift_seconds}s, after drift {residual}s)"
                )
            }
        }
        None if drift_seconds.abs() < 2 => {
            format!("Camera time already synchronized (drift {drift_seconds}s)")
        }
        None => format!("Camera time set (adjusted by {drift_seconds}s, verification unavailable)"),
    };

    tracing::info!(camera_id = id, drift_seconds, message = %message, "Time sync finished");

    Ok(Json(TimeSyncResult {
        success: true,
        before_time: before,
        server_time: server_time.to_rfc3339(),
        message,
        error: None,
    }))
}
