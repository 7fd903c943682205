//! Metadata store entity types

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Camera kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraKind {
    Onvif,
    Rtsp,
    Uvc,
}

impl CameraKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraKind::Onvif => "onvif",
            CameraKind::Rtsp => "rtsp",
            CameraKind::Uvc => "uvc",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "onvif" => Ok(CameraKind::Onvif),
            "rtsp" => Ok(CameraKind::Rtsp),
            "uvc" => Ok(CameraKind::Uvc),
            other => Err(Error::InvalidInput(format!("Unknown camera kind: {other}"))),
        }
    }
}

/// Camera row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CameraKind,
    pub host: String,
    pub port: i64,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// ONVIF device service address
    pub xaddr: Option<String>,
    /// RTSP path component
    pub stream_path: Option<String>,
    /// UVC capture tuple
    pub device_node: Option<String>,
    pub pixel_format: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New camera request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCamera {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CameraKind,
    pub host: String,
    pub port: i64,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub xaddr: Option<String>,
    pub stream_path: Option<String>,
    pub device_node: Option<String>,
    pub pixel_format: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
}

impl NewCamera {
    /// Kind-dependent field validation, applied before insert
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("Camera name must not be empty".into()));
        }
        match self.kind {
            CameraKind::Onvif => {
                if self.xaddr.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::InvalidInput(
                        "ONVIF camera requires an xaddr".into(),
                    ));
                }
            }
            CameraKind::Rtsp => {
                if !(1..=65535).contains(&self.port) {
                    return Err(Error::InvalidInput("RTSP camera requires a port".into()));
                }
            }
            CameraKind::Uvc => {
                if self.device_node.as_deref().map_or(true, str::is_empty) {
                    return Err(Error::InvalidInput(
                        "UVC camera requires a device node".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Recording row (exists only after finalize)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: i64,
    pub camera_id: i64,
    pub filename: String,
    pub thumbnail: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Joined for list display
    pub camera_name: Option<String>,
}

/// Recording schedule row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    pub camera_id: i64,
    pub name: String,
    /// Normalized 6-field cron (leading seconds), evaluated in Asia/Tokyo
    pub cron_expression: String,
    pub duration_minutes: i64,
    pub fps: Option<i64>,
    pub is_enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub camera_name: Option<String>,
}

/// New schedule request payload
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub camera_id: i64,
    pub name: String,
    pub cron_expression: String,
    pub duration_minutes: i64,
    pub fps: Option<i64>,
    pub is_enabled: bool,
}

/// Schedule patch payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSchedule {
    pub name: Option<String>,
    pub cron_expression: Option<String>,
    pub duration_minutes: Option<i64>,
    pub fps: Option<i64>,
    pub is_enabled: Option<bool>,
}

/// Encoder settings row (single row, id = 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSettings {
    pub id: i64,
    /// "Auto" | "GpuOnly" | "CpuOnly"
    pub encoder_mode: String,
    pub gpu_encoder: Option<String>,
    pub cpu_encoder: String,
    pub preset: String,
    /// CRF/CQ value, clamped into [18, 28] on use
    pub quality: i64,
}

/// Encoder settings patch payload
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEncoderSettings {
    pub encoder_mode: Option<String>,
    pub gpu_encoder: Option<String>,
    pub cpu_encoder: Option<String>,
    pub preset: Option<String>,
    pub quality: Option<i64>,
}

impl UpdateEncoderSettings {
    pub fn is_empty(&self) -> bool {
        self.encoder_mode.is_none()
            && self.gpu_encoder.is_none()
            && self.cpu_encoder.is_none()
            && self.preset.is_none()
            && self.quality.is_none()
    }
}

/// Live-state certification for the camera delete gate.
///
/// The caller (RPC facade) fills this from the supervisor and the recording
/// manager after tearing both down; the store refuses the delete while
/// either flag is still set.
#[derive(Debug, Clone, Copy)]
pub struct LiveRefs {
    pub streaming: bool,
    pub recording: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_camera(kind: CameraKind) -> NewCamera {
        NewCamera {
            name: "Cam".into(),
            kind,
            host: "192.0.2.10".into(),
            port: 80,
            user: None,
            pass: None,
            xaddr: None,
            stream_path: None,
            device_node: None,
            pixel_format: None,
            width: None,
            height: None,
            fps: None,
        }
    }

    #[test]
    fn onvif_requires_xaddr() {
        let mut cam = base_camera(CameraKind::Onvif);
        assert!(cam.validate().is_err());
        cam.xaddr = Some("http://192.0.2.10/onvif/device_service".into());
        assert!(cam.validate().is_ok());
    }

    #[test]
    fn uvc_requires_device_node() {
        let mut cam = base_camera(CameraKind::Uvc);
        assert!(cam.validate().is_err());
        cam.device_node = Some("/dev/video0".into());
        assert!(cam.validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut cam = base_camera(CameraKind::Rtsp);
        cam.name = "  ".into();
        assert!(cam.validate().is_err());
    }

    #[test]
    fn kind_round_trip() {
        for kind in [CameraKind::Onvif, CameraKind::Rtsp, CameraKind::Uvc] {
            assert_eq!(CameraKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(CameraKind::parse("webrtc").is_err());
    }
}
