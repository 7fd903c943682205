//! Encoder selection types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Operator-configured selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    /// Hardware if the self-test passed, otherwise software
    Auto,
    /// Hardware or fail fast
    GpuOnly,
    /// Software only
    CpuOnly,
}

impl EncoderMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Auto" => Ok(EncoderMode::Auto),
            "GpuOnly" => Ok(EncoderMode::GpuOnly),
            "CpuOnly" => Ok(EncoderMode::CpuOnly),
            other => Err(Error::InvalidInput(format!("Unknown encoder mode: {other}"))),
        }
    }
}

/// GPU family detected on the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuType {
    Nvidia,
    Intel,
    Amd,
    VaApi,
    VideoToolbox,
    None,
}

impl GpuType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuType::Nvidia => "NVIDIA",
            GpuType::Intel => "Intel",
            GpuType::Amd => "AMD",
            GpuType::VaApi => "VA-API",
            GpuType::VideoToolbox => "VideoToolbox",
            GpuType::None => "None",
        }
    }
}

/// Probe result returned by `detect_gpu`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuCapabilities {
    pub available_encoders: Vec<String>,
    pub preferred_encoder: Option<String>,
    pub gpu_type: String,
    pub gpu_name: Option<String>,
}

/// Transcoder CLI argument bag for one selected encoder
#[derive(Debug, Clone)]
pub struct EncoderProfile {
    /// ffmpeg encoder name (h264_nvenc, libx264, ...)
    pub encoder: String,
    pub is_hw: bool,
    /// Hardware-init args that must precede the input
    pub input_args: Vec<String>,
    /// Codec, preset, rate-control, quality, pixel format
    pub video_args: Vec<String>,
}

/// CRF/CQ values are only meaningful inside this band for the product
pub fn clamp_quality(quality: i64) -> i64 {
    quality.clamp(18, 28)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_band() {
        assert_eq!(clamp_quality(10), 18);
        assert_eq!(clamp_quality(18), 18);
        assert_eq!(clamp_quality(23), 23);
        assert_eq!(clamp_quality(28), 28);
        assert_eq!(clamp_quality(51), 28);
    }

    #[test]
    fn mode_parse() {
        assert_eq!(EncoderMode::parse("Auto").unwrap(), EncoderMode::Auto);
        assert_eq!(EncoderMode::parse("GpuOnly").unwrap(), EncoderMode::GpuOnly);
        assert_eq!(EncoderMode::parse("CpuOnly").unwrap(), EncoderMode::CpuOnly);
        assert!(EncoderMode::parse("Turbo").is_err());
    }
}
