//! Hardware encoder probing
//!
//! Inspects the transcoder's encoder list, identifies the GPU family, and
//! self-tests candidates by encoding a short synthetic source.

use super::types::{GpuCapabilities, GpuType};
use crate::error::{Error, Result};
use tokio::process::Command;

/// Hardware candidates in preference order; libx264 is the implicit tail.
pub const HW_CANDIDATES: &[&str] = &[
    "h264_nvenc",
    "h264_qsv",
    "h264_amf",
    "h264_vaapi",
    "h264_videotoolbox",
];

/// Probe the host: encoder list, GPU family, preferred candidate.
pub async fn detect_gpu(ffmpeg_bin: &str) -> Result<GpuCapabilities> {
    let available = available_encoders(ffmpeg_bin).await?;
    let (gpu_type, gpu_name) = detect_gpu_type().await;
    let preferred = pick_preferred(gpu_type, &available);

    tracing::info!(
        gpu_type = gpu_type.as_str(),
        gpu_name = ?gpu_name,
        available = ?available,
        preferred = ?preferred,
        "GPU capabilities detected"
    );

    Ok(GpuCapabilities {
        available_encoders: available,
        preferred_encoder: preferred,
        gpu_type: gpu_type.as_str().to_string(),
        gpu_name,
    })
}

/// Hardware encoders compiled into the transcoder binary
pub async fn available_encoders(ffmpeg_bin: &str) -> Result<Vec<String>> {
    let output = Command::new(ffmpeg_bin)
        .args(["-encoders", "-hide_banner"])
        .output()
        .await
        .map_err(|e| Error::ProcessFailed(format!("{ffmpeg_bin} not found: {e}")))?;

    if !output.status.success() {
        return Err(Error::ProcessFailed(
            "ffmpeg -encoders returned non-zero".into(),
        ));
    }

    Ok(parse_encoder_list(&String::from_utf8_lossy(&output.stdout)))
}

/// Extract known hardware candidates from `ffmpeg -encoders` output,
/// ordered by preference rather than listing order
pub fn parse_encoder_list(stdout: &str) -> Vec<String> {
    HW_CANDIDATES
        .iter()
        .filter(|candidate| stdout.lines().any(|line| line.contains(*candidate)))
        .map(|candidate| candidate.to_string())
        .collect()
}

/// Encode ~0.5 s of a synthetic source with the candidate; success means
/// the encoder actually initializes on this host.
pub async fn self_test(ffmpeg_bin: &str, encoder: &str) -> bool {
    let mut args: Vec<String> = hw_init_args(encoder)
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.extend(
        [
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=0.5:size=320x240:rate=30",
            "-c:v",
            encoder,
            "-frames:v",
            "10",
            "-f",
            "null",
            "-",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    let output = Command::new(ffmpeg_bin).args(&args).output().await;

    match output {
        Ok(result) => {
            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                tracing::warn!(
                    encoder = %encoder,
                    exit = ?result.status.code(),
                    stderr_tail = %stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | "),
                    "Encoder self-test failed"
                );
            } else {
                tracing::debug!(encoder = %encoder, "Encoder self-test passed");
            }
            result.status.success()
        }
        Err(e) => {
            tracing::warn!(encoder = %encoder, error = %e, "Encoder self-test could not run");
            false
        }
    }
}

/// Hardware device initialization flags required before the input
pub fn hw_init_args(encoder: &str) -> &'static [&'static str] {
    match encoder {
        "h264_qsv" => &["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"],
        "h264_vaapi" => &[
            "-init_hw_device",
            "vaapi=va:/dev/dri/renderD128",
            "-filter_hw_device",
            "va",
        ],
        _ => &[],
    }
}

async fn detect_gpu_type() -> (GpuType, Option<String>) {
    if let Some(name) = detect_nvidia().await {
        return (GpuType::Nvidia, Some(name));
    }
    if let Some(name) = detect_pci_vendor("intel").await {
        return (GpuType::Intel, Some(name));
    }
    if let Some(name) = detect_pci_vendor("amd").await {
        return (GpuType::Amd, Some(name));
    }

    #[cfg(target_os = "macos")]
    {
        return (GpuType::VideoToolbox, Some("Apple GPU".to_string()));
    }

    #[cfg(target_os = "linux")]
    {
        if std::path::Path::new("/dev/dri/renderD128").exists() {
            return (GpuType::VaApi, Some("VA-API Device".to_string()));
        }
    }

    (GpuType::None, None)
}

async fn detect_nvidia() -> Option<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// lspci-based VGA vendor lookup (Linux); other platforms fall through
async fn detect_pci_vendor(vendor: &str) -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let output = Command::new("lspci").output().await.ok()?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        for line in stdout.lines() {
            let lower = line.to_lowercase();
            let matches_vendor = match vendor {
                "amd" => lower.contains("amd") || lower.contains("radeon"),
                v => lower.contains(v),
            };
            if lower.contains("vga") && matches_vendor {
                return Some(line.split(':').nth(2).unwrap_or("GPU").trim().to_string());
            }
        }
        None
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = vendor;
        None
    }
}

/// Preferred candidate for the detected GPU family, if compiled in
pub fn pick_preferred(gpu_type: GpuType, available: &[String]) -> Option<String> {
    let wanted = match gpu_type {
        GpuType::Nvidia => "h264_nvenc",
        GpuType::Intel => "h264_qsv",
        GpuType::Amd => "h264_amf",
        GpuType::VaApi => "h264_vaapi",
        GpuType::VideoToolbox => "h264_videotoolbox",
        GpuType::None => return None,
    };

    available
        .iter()
        .find(|e| e.as_str() == wanted)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODER_LISTING: &str = "\
 Encoders:
 V..... libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 V..... h264_vaapi           H.264/AVC (VAAPI) (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)";

    #[test]
    fn parses_only_known_hw_candidates() {
        let encoders = parse_encoder_list(ENCODER_LISTING);
        assert_eq!(encoders, vec!["h264_nvenc", "h264_vaapi"]);
    }

    #[test]
    fn preferred_follows_gpu_family() {
        let available = vec!["h264_nvenc".to_string(), "h264_vaapi".to_string()];
        assert_eq!(
            pick_preferred(GpuType::Nvidia, &available),
            Some("h264_nvenc".to_string())
        );
        assert_eq!(
            pick_preferred(GpuType::VaApi, &available),
            Some("h264_vaapi".to_string())
        );
        assert_eq!(pick_preferred(GpuType::Intel, &available), None);
        assert_eq!(pick_preferred(GpuType::None, &available), None);
    }

    #[test]
    fn qsv_and_vaapi_need_device_init() {
        assert!(!hw_init_args("h264_qsv").is_empty());
        assert!(!hw_init_args("h264_vaapi").is_empty());
        assert!(hw_init_args("h264_nvenc").is_empty());
        assert!(hw_init_args("libx264").is_empty());
    }
}
