//! Application state
//!
//! Holds configuration and all shared components

use crate::discovery::DiscoveryEngine;
use crate::encoder::EncoderSelector;
use crate::onvif::OnvifClient;
use crate::realtime_hub::RealtimeHub;
use crate::recording::RecordingManager;
use crate::scheduler::ScheduleEngine;
use crate::store::MetadataStore;
use crate::stream_supervisor::StreamSupervisor;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Data root (db file, hls/, recordings/, thumbnails/)
    pub data_dir: PathBuf,
    /// Bind host (loopback only)
    pub host: String,
    /// Media/RPC port
    pub port: u16,
    /// ffmpeg binary to shell out to
    pub ffmpeg_bin: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: std::env::var("CAMHUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./camhub-data")),
            host: std::env::var("CAMHUB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("CAMHUB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            ffmpeg_bin: std::env::var("CAMHUB_FFMPEG").unwrap_or_else(|_| "ffmpeg".to_string()),
        }
    }
}

impl AppConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db.sqlite")
    }

    /// Root for per-camera HLS working directories
    pub fn hls_dir(&self) -> PathBuf {
        self.data_dir.join("hls")
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// In-progress MPEG-TS captures live here until finalize
    pub fn recordings_tmp_dir(&self) -> PathBuf {
        self.data_dir.join("recordings").join("tmp")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.data_dir.join("thumbnails")
    }

    /// Base URL of the media server the collaborator reads from
    pub fn media_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Metadata store (cameras, recordings, schedules, encoder settings)
    pub store: Arc<MetadataStore>,
    /// Encoder selector (GPU probing + cached profiles)
    pub encoder: Arc<EncoderSelector>,
    /// ONVIF SOAP client
    pub onvif: Arc<OnvifClient>,
    /// WS-Discovery subnet sweep
    pub discovery: Arc<DiscoveryEngine>,
    /// Stream supervisor (transcoder children + HLS dirs)
    pub supervisor: Arc<StreamSupervisor>,
    /// Recording manager (recorder children + finalize)
    pub recorder: Arc<RecordingManager>,
    /// Cron schedule engine
    pub scheduler: Arc<ScheduleEngine>,
    /// Event hub (recording-finalized, stream-dead)
    pub hub: Arc<RealtimeHub>,
}
