//! Encoder selector
//!
//! ## Responsibilities
//!
//! - Probe the host for hardware encoders (see `detect`)
//! - Apply the operator policy (Auto / GpuOnly / CpuOnly)
//! - Produce transcoder CLI argument bags with quality clamped to [18, 28]
//! - Cache the selection for the process lifetime; settings changes
//!   invalidate the cache

pub mod detect;
pub mod types;

pub use types::{clamp_quality, EncoderMode, EncoderProfile, GpuCapabilities};

use crate::error::{Error, Result};
use crate::store::{EncoderSettings, EncoderSettingsRepository};
use detect::{available_encoders, hw_init_args, self_test};
use tokio::sync::RwLock;

pub struct EncoderSelector {
    ffmpeg_bin: String,
    settings: EncoderSettingsRepository,
    cache: RwLock<Option<EncoderProfile>>,
}

impl EncoderSelector {
    pub fn new(ffmpeg_bin: impl Into<String>, settings: EncoderSettingsRepository) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            settings,
            cache: RwLock::new(None),
        }
    }

    /// Resolve the encoder profile for spawning a transcoder child.
    pub async fn select(&self) -> Result<EncoderProfile> {
        {
            let cache = self.cache.read().await;
            if let Some(profile) = cache.as_ref() {
                return Ok(profile.clone());
            }
        }

        let settings = self.settings.get().await?;
        let profile = self.resolve(&settings).await?;

        tracing::info!(
            encoder = %profile.encoder,
            is_hw = profile.is_hw,
            "Encoder selected"
        );

        let mut cache = self.cache.write().await;
        *cache = Some(profile.clone());
        Ok(profile)
    }

    /// Drop the cached selection (called on settings updates).
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
        tracing::debug!("Encoder selection cache invalidated");
    }

    async fn resolve(&self, settings: &EncoderSettings) -> Result<EncoderProfile> {
        let mode = EncoderMode::parse(&settings.encoder_mode)?;

        match mode {
            EncoderMode::CpuOnly => Ok(software_profile(settings)),
            EncoderMode::GpuOnly => {
                let encoder = settings.gpu_encoder.as_deref().ok_or_else(|| {
                    Error::InvalidInput("GpuOnly mode requires a GPU encoder".into())
                })?;
                if !self_test(&self.ffmpeg_bin, encoder).await {
                    return Err(Error::ProcessFailed(format!(
                        "GPU encoder {encoder} failed its self-test"
                    )));
                }
                Ok(hardware_profile(encoder, settings))
            }
            EncoderMode::Auto => {
                let candidate = match settings.gpu_encoder.clone() {
                    Some(enc) => Some(enc),
                    None => {
                        let available = available_encoders(&self.ffmpeg_bin)
                            .await
                            .unwrap_or_default();
                        available.into_iter().next()
                    }
                };

                if let Some(encoder) = candidate {
                    if self_test(&self.ffmpeg_bin, &encoder).await {
                        return Ok(hardware_profile(&encoder, settings));
                    }
                    tracing::warn!(
                        encoder = %encoder,
                        "Hardware encoder self-test failed, falling back to software"
                    );
                }
                Ok(software_profile(settings))
            }
        }
    }
}

/// Software encoding arguments (CRF rate control)
pub fn software_profile(settings: &EncoderSettings) -> EncoderProfile {
    let quality = clamp_quality(settings.quality);
    EncoderProfile {
        encoder: settings.cpu_encoder.clone(),
        is_hw: false,
        input_args: Vec::new(),
        video_args: vec![
            "-c:v".into(),
            settings.cpu_encoder.clone(),
            "-preset".into(),
            settings.preset.clone(),
            "-tune".into(),
            "zerolatency".into(),
            "-crf".into(),
            quality.to_string(),
            "-pix_fmt".into(),
            "yuv420p".into(),
        ],
    }
}

/// Hardware encoding arguments per vendor family (CQ-style rate control)
pub fn hardware_profile(encoder: &str, settings: &EncoderSettings) -> EncoderProfile {
    let quality = clamp_quality(settings.quality);
    let video_args: Vec<String> = match encoder {
        "h264_nvenc" => vec![
            "-c:v".into(),
            encoder.into(),
            "-preset".into(),
            "p4".into(),
            "-rc".into(),
            "vbr".into(),
            "-cq".into(),
            quality.to_string(),
            "-bf".into(),
            "0".into(),
        ],
        "h264_qsv" => vec![
            "-c:v".into(),
            encoder.into(),
            "-preset".into(),
            "veryfast".into(),
            "-global_quality".into(),
            quality.to_string(),
        ],
        "h264_amf" => vec![
            "-c:v".into(),
            encoder.into(),
            "-quality".into(),
            "balanced".into(),
            "-rc".into(),
            "cqp".into(),
            "-qp_i".into(),
            quality.to_string(),
            "-qp_p".into(),
            quality.to_string(),
        ],
        "h264_vaapi" => vec![
            "-c:v".into(),
            encoder.into(),
            "-qp".into(),
            quality.to_string(),
        ],
        "h264_videotoolbox" => vec![
            "-c:v".into(),
            encoder.into(),
            "-q:v".into(),
            quality.to_string(),
            "-realtime".into(),
            "1".into(),
        ],
        _ => vec!["-c:v".into(), encoder.into()],
    };

    EncoderProfile {
        encoder: encoder.to_string(),
        is_hw: true,
        input_args: hw_init_args(encoder).iter().map(|s| s.to_string()).collect(),
        video_args,
    }
}
