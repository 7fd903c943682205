//! UVC device plane
//!
//! ## Responsibilities
//!
//! - Enumerate local capture devices per platform (v4l2 on Linux,
//!   DirectShow on Windows, AVFoundation on macOS)
//! - Filter out metadata-only nodes
//! - Pick the capture tuple: MJPG preferred over YUYV, then the largest
//!   frame area, then the highest frame rate
//!
//! The chosen tuple is recorded on the camera row when the device is added.

use serde::Serialize;
use tokio::process::Command;

/// A usable local capture device and its selected capture tuple
#[derive(Debug, Clone, Serialize)]
pub struct UvcDevice {
    pub name: String,
    pub device_node: String,
    pub pixel_format: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
}

/// Selected (format, resolution, fps) tuple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChoice {
    pub pixel_format: String,
    pub width: i64,
    pub height: i64,
    pub fps: i64,
}

/// Enumerate usable capture devices on this host.
pub async fn probe_devices() -> Vec<UvcDevice> {
    #[cfg(target_os = "linux")]
    {
        probe_v4l2().await
    }

    #[cfg(target_os = "windows")]
    {
        probe_directshow().await
    }

    #[cfg(target_os = "macos")]
    {
        probe_avfoundation().await
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        Vec::new()
    }
}

// ============================================================================
// Linux (v4l2)
// ============================================================================

#[cfg(target_os = "linux")]
async fn probe_v4l2() -> Vec<UvcDevice> {
    let mut nodes: Vec<String> = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir("/dev").await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path().to_string_lossy().to_string();
            if let Some(num) = path.strip_prefix("/dev/video") {
                if num.parse::<u32>().is_ok() {
                    nodes.push(path);
                }
            }
        }
    }
    nodes.sort();

    let mut devices = Vec::new();
    for node in nodes {
        let caps = v4l2_ctl(&["--device", &node, "--all"]).await;
        if !caps.as_deref().map(has_video_capture).unwrap_or(false) {
            tracing::debug!(node = %node, "Skipping metadata-only device");
            continue;
        }

        let name = v4l2_ctl(&["--device", &node, "--info"])
            .await
            .as_deref()
            .and_then(parse_card_type)
            .unwrap_or_else(|| format!("USB Camera ({node})"));

        let formats = v4l2_ctl(&["--device", &node, "--list-formats-ext"]).await;
        let choice = formats.as_deref().and_then(select_best_format);

        tracing::info!(node = %node, name = %name, choice = ?choice, "Found v4l2 capture device");

        devices.push(UvcDevice {
            name,
            device_node: node,
            pixel_format: choice.as_ref().map(|c| c.pixel_format.clone()),
            width: choice.as_ref().map(|c| c.width),
            height: choice.as_ref().map(|c| c.height),
            fps: choice.as_ref().map(|c| c.fps),
        });
    }

    devices
}

#[cfg(target_os = "linux")]
async fn v4l2_ctl(args: &[&str]) -> Option<String> {
    let output = Command::new("v4l2-ctl").args(args).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Does the `Device Caps` section list Video Capture (not Metadata Capture)?
pub fn has_video_capture(v4l2_all: &str) -> bool {
    let mut in_device_caps = false;
    for line in v4l2_all.lines() {
        if line.contains("Device Caps") {
            in_device_caps = true;
            continue;
        }
        if in_device_caps {
            if !line.starts_with('\t') && !line.starts_with("    ") && !line.trim().is_empty() {
                break;
            }
            if line.contains("Video Capture") && !line.contains("Metadata Capture") {
                return true;
            }
        }
    }
    false
}

/// "Card type : HD Pro Webcam C920" → device display name. The name itself
/// may contain ':', so split only once.
pub fn parse_card_type(v4l2_info: &str) -> Option<String> {
    for line in v4l2_info.lines() {
        if line.contains("Card type") {
            let parts: Vec<&str> = line.splitn(2, ':').collect();
            if parts.len() == 2 {
                return Some(parts[1].trim().to_string());
            }
        }
    }
    None
}

/// Walk `--list-formats-ext` output and score every (format, size, fps)
/// combination: MJPG dominates, then frame area, then fps.
pub fn select_best_format(listing: &str) -> Option<FormatChoice> {
    let mut best: Option<FormatChoice> = None;
    let mut best_score = 0i64;

    let mut current_format: Option<&str> = None;
    let mut current_width = 0i64;
    let mut current_height = 0i64;

    for line in listing.lines() {
        if line.contains("'MJPG'") || line.contains("Motion-JPEG") {
            current_format = Some("mjpeg");
        } else if line.contains("'YUYV'") {
            current_format = Some("yuyv");
        }

        if let Some(size) = line.split("Size: Discrete").nth(1) {
            let parts: Vec<&str> = size.trim().split('x').collect();
            if parts.len() == 2 {
                current_width = parts[0].trim().parse().unwrap_or(0);
                current_height = parts[1].trim().parse().unwrap_or(0);
            }
        }

        if line.contains("Interval: Discrete") && line.contains("fps") {
            let fps = line
                .split('(')
                .nth(1)
                .and_then(|s| s.split('.').next())
                .and_then(|s| s.trim().parse::<i64>().ok());

            if let (Some(format), Some(fps)) = (current_format, fps) {
                let format_score = if format == "mjpeg" { 10_000 } else { 0 };
                let score = format_score + current_width * current_height / 1000 + fps;

                if score > best_score && current_width > 0 {
                    best_score = score;
                    best = Some(FormatChoice {
                        pixel_format: format.to_string(),
                        width: current_width,
                        height: current_height,
                        fps,
                    });
                }
            }
        }
    }

    best
}

// ============================================================================
// Windows (DirectShow via ffmpeg)
// ============================================================================

#[cfg(target_os = "windows")]
async fn probe_directshow() -> Vec<UvcDevice> {
    let output = Command::new("ffmpeg")
        .args(["-list_devices", "true", "-f", "dshow", "-i", "dummy"])
        .output()
        .await;

    let stderr = match output {
        Ok(out) => String::from_utf8_lossy(&out.stderr).to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "DirectShow enumeration failed");
            return Vec::new();
        }
    };

    parse_dshow_devices(&stderr)
        .into_iter()
        .map(|name| UvcDevice {
            device_node: format!("video={name}"),
            name,
            pixel_format: None,
            width: None,
            height: None,
            fps: None,
        })
        .collect()
}

/// Device names from the DirectShow video section of ffmpeg's stderr
pub fn parse_dshow_devices(stderr: &str) -> Vec<String> {
    let mut devices = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("DirectShow video devices") {
            in_video_section = true;
            continue;
        }
        if line.contains("DirectShow audio devices") {
            break;
        }
        if in_video_section {
            if let (Some(start), Some(end)) = (line.find('"'), line.rfind('"')) {
                if end > start {
                    devices.push(line[start + 1..end].to_string());
                }
            }
        }
    }

    devices
}

// ============================================================================
// macOS (AVFoundation via ffmpeg)
// ============================================================================

#[cfg(target_os = "macos")]
async fn probe_avfoundation() -> Vec<UvcDevice> {
    let output = Command::new("ffmpeg")
        .args(["-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .output()
        .await;

    let stderr = match output {
        Ok(out) => String::from_utf8_lossy(&out.stderr).to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "AVFoundation enumeration failed");
            return Vec::new();
        }
    };

    parse_avfoundation_devices(&stderr)
        .into_iter()
        .enumerate()
        .map(|(index, name)| UvcDevice {
            name,
            device_node: index.to_string(),
            pixel_format: None,
            width: None,
            height: None,
            fps: None,
        })
        .collect()
}

/// Device names from the AVFoundation video section of ffmpeg's stderr
pub fn parse_avfoundation_devices(stderr: &str) -> Vec<String> {
    let mut devices = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("AVFoundation video devices") {
            in_video_section = true;
            continue;
        }
        if line.contains("AVFoundation audio devices") {
            break;
        }
        if in_video_section {
            let parts: Vec<&str> = line.split(']').collect();
            if parts.len() >= 3 {
                let name = parts[2].trim();
                if !name.is_empty() {
                    devices.push(name.to_string());
                }
            }
        }
    }

    devices
}
