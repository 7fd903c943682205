//! HTTP media server routes
//!
//! ## Responsibilities
//!
//! - `/hls/{camera_id}/{file}`: live manifests and segments from the
//!   supervisor's working directories, content type by extension
//! - `/recordings/{file}`: finalized MP4s with range-request support
//! - `/thumbnails/{file}`: JPEG thumbnails
//!
//! No directory listings; a request that resolves outside the served roots
//! is 404. A segment the transcoder just rolled away is also 404 and the
//! HLS client retries. The in-progress `recordings/tmp/` subtree is not
//! routable.

use axum::{
    body::Body,
    extract::{Path as PathParam, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::PathBuf;
use tower::ServiceExt;
use tower_http::services::ServeFile;

#[derive(Clone)]
struct MediaState {
    hls_root: PathBuf,
    recordings_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

pub fn router(hls_root: PathBuf, recordings_dir: PathBuf, thumbnails_dir: PathBuf) -> Router {
    let state = MediaState {
        hls_root,
        recordings_dir,
        thumbnails_dir,
    };

    Router::new()
        .route("/hls/:camera_id/:file", get(serve_hls))
        .route("/recordings/:file", get(serve_recording))
        .route("/thumbnails/:file", get(serve_thumbnail))
        .with_state(state)
}

/// One path segment, no traversal
fn is_safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\') && !name.contains("..")
}

/// Content type by extension; the manifest/segment types are part of the
/// HLS contract with the player
fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Manifests and segments are small and rotate fast; a plain read is
/// simpler than range plumbing and a missing file is the expected race.
async fn serve_hls(
    State(state): State<MediaState>,
    PathParam((camera_id, file)): PathParam<(String, String)>,
) -> Response {
    if camera_id.parse::<i64>().is_err() || !is_safe_name(&file) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.hls_root.join(&camera_id).join(&file);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, content_type_for(&file))],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve_recording(
    State(state): State<MediaState>,
    PathParam(file): PathParam<String>,
    request: Request,
) -> Response {
    serve_file(state.recordings_dir.join(&file), &file, request).await
}

async fn serve_thumbnail(
    State(state): State<MediaState>,
    PathParam(file): PathParam<String>,
    request: Request,
) -> Response {
    serve_file(state.thumbnails_dir.join(&file), &file, request).await
}

/// Delegate to `ServeFile` for range-request support on finalized media.
async fn serve_file(path: PathBuf, name: &str, request: Request) -> Response {
    if !is_safe_name(name) || !path.is_file() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
