//! Recording manager
//!
//! ## Responsibilities
//!
//! - Run a recorder child alongside (and independent of) any live stream
//! - Capture MPEG-TS into `recordings/tmp/`, finalize into faststart MP4
//!   plus a thumbnail, then persist the row and emit `recording-finalized`
//! - Bound scheduled recordings with a stop-timer
//! - At most one RecordingJob per camera; start/stop strictly serialized
//!
//! The recorder decodes the source a second time on purpose: it keeps the
//! capture immune to HLS segment rotation. UVC device nodes are the one
//! exception to stream independence, since the node cannot be opened twice.

use crate::camera_locks::CameraLocks;
use crate::child;
use crate::encoder::EncoderSelector;
use crate::error::{Error, Result};
use crate::onvif::OnvifClient;
use crate::realtime_hub::RealtimeHub;
use crate::source;
use crate::store::{Camera, CameraKind, MetadataStore, Recording};
use crate::stream_supervisor::StreamSupervisor;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, RwLock};

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);
/// Stop ack must cover the grace period plus the finalize remux
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Options accepted by `start` (RPC payload)
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RecordingOptions {
    /// Frame-rate override (scheduled recordings may pin this)
    pub fps: Option<i64>,
    /// Stop automatically after this many minutes
    #[serde(alias = "duration")]
    pub duration_minutes: Option<i64>,
}

enum StopRequest {
    /// Graceful stop + finalize; replies with the new recording id
    Finalize(oneshot::Sender<Result<i64>>),
    /// Teardown without a row (camera deletion); tmp capture is discarded
    Abort(oneshot::Sender<()>),
}

struct RecordingJob {
    ts_path: PathBuf,
    stop_tx: mpsc::Sender<StopRequest>,
    timer: Option<tokio::task::JoinHandle<()>>,
}

pub struct RecordingManager {
    ffmpeg_bin: String,
    tmp_dir: PathBuf,
    recordings_dir: PathBuf,
    thumbnails_dir: PathBuf,
    store: MetadataStore,
    onvif: Arc<OnvifClient>,
    encoder: Arc<EncoderSelector>,
    hub: Arc<RealtimeHub>,
    supervisor: Arc<StreamSupervisor>,
    jobs: Arc<RwLock<HashMap<i64, RecordingJob>>>,
    locks: CameraLocks,
}

impl RecordingManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ffmpeg_bin: impl Into<String>,
        tmp_dir: PathBuf,
        recordings_dir: PathBuf,
        thumbnails_dir: PathBuf,
        store: MetadataStore,
        onvif: Arc<OnvifClient>,
        encoder: Arc<EncoderSelector>,
        hub: Arc<RealtimeHub>,
        supervisor: Arc<StreamSupervisor>,
    ) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            tmp_dir,
            recordings_dir,
            thumbnails_dir,
            store,
            onvif,
            encoder,
            hub,
            supervisor,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            locks: CameraLocks::new(),
        }
    }

    /// Spawn the recorder child for a camera.
    pub async fn start(self: &Arc<Self>, camera: &Camera, options: RecordingOptions) -> Result<()> {
        let _guard = self.locks.lock(camera.id).await;

        if self.jobs.read().await.contains_key(&camera.id) {
            return Err(Error::AlreadyExists(format!(
                "Camera {} is already recording",
                camera.id
            )));
        }

        // A UVC node is exclusive; the stream must release it first
        if camera.kind == CameraKind::Uvc && self.supervisor.is_streaming(camera.id).await {
            tracing::info!(
                camera_id = camera.id,
                "Stopping stream to free the capture device for recording"
            );
            self.supervisor.stop(camera.id).await?;
        }

        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        tokio::fs::create_dir_all(&self.recordings_dir).await?;
        tokio::fs::create_dir_all(&self.thumbnails_dir).await?;

        let input = source::resolve_with_retry(camera, &self.onvif).await?;
        let profile = self.encoder.select().await?;

        let fps = options.fps.unwrap_or(input.fps_hint);
        let gop = fps * 2;

        let started_at = Utc::now();
        let stem = format!("{}_{}", camera.id, started_at.format("%Y%m%d_%H%M%S"));
        let ts_path = self.tmp_dir.join(format!("{stem}.ts"));

        let mut args: Vec<String> = vec!["-y".into()];
        args.extend(profile.input_args.iter().cloned());
        args.extend(input.args.iter().cloned());
        args.extend(profile.video_args.iter().cloned());
        if options.fps.is_some() {
            args.push("-r".into());
            args.push(fps.to_string());
        }
        args.extend([
            "-g".into(),
            gop.to_string(),
            "-c:a".into(),
            "aac".into(),
            "-ac".into(),
            "2".into(),
            "-ar".into(),
            "48000".into(),
            "-f".into(),
            "mpegts".into(),
            ts_path.to_string_lossy().into_owned(),
        ]);

        let mut spawned = child::spawn(&self.ffmpeg_bin, &args)?;
        if let Err(e) = child::confirm_started(&mut spawned).await {
            let _ = tokio::fs::remove_file(&ts_path).await;
            return Err(e);
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);

        // Duration-bounded recordings stop themselves through the shared
        // stop path; explicit stop cancels this timer first.
        let timer = options.duration_minutes.map(|minutes| {
            let manager = Arc::clone(self);
            let camera_id = camera.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs((minutes * 60) as u64)).await;
                tracing::info!(camera_id, minutes, "Recording duration reached");
                if let Err(e) = manager.stop(camera_id).await {
                    tracing::error!(camera_id, error = %e, "Timed recording stop failed");
                }
            })
        });

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(
                camera.id,
                RecordingJob {
                    ts_path: ts_path.clone(),
                    stop_tx,
                    timer,
                },
            );
        }

        tokio::spawn(watch_recorder(
            camera.id,
            spawned,
            stop_rx,
            FinalizeContext {
                ffmpeg_bin: self.ffmpeg_bin.clone(),
                ts_path,
                mp4_path: self.recordings_dir.join(format!("{stem}.mp4")),
                thumb_path: self.thumbnails_dir.join(format!("{stem}.jpg")),
                started_at,
                store: self.store.clone(),
                hub: self.hub.clone(),
            },
            self.jobs.clone(),
        ));

        tracing::info!(
            camera_id = camera.id,
            fps,
            duration_minutes = ?options.duration_minutes,
            "Recording started"
        );
        Ok(())
    }

    /// Stop and finalize. Stopping a camera with no job is success.
    pub async fn stop(&self, camera_id: i64) -> Result<Option<i64>> {
        let _guard = self.locks.lock(camera_id).await;

        let job = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(&camera_id)
        };

        let Some(job) = job else {
            tracing::debug!(camera_id, "Stop with no recording job (no-op)");
            return Ok(None);
        };

        if let Some(timer) = job.timer {
            timer.abort();
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if job.stop_tx.send(StopRequest::Finalize(ack_tx)).await.is_err() {
            // Watcher already gone (child crashed); the tmp capture stays
            return Err(Error::ProcessFailed(format!(
                "Recorder for camera {camera_id} exited before stop"
            )));
        }

        match tokio::time::timeout(STOP_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(result)) => {
                let id = result?;
                tracing::info!(camera_id, recording_id = id, "Recording finalized");
                Ok(Some(id))
            }
            Ok(Err(_)) | Err(_) => Err(Error::Timeout(format!(
                "Finalize for camera {camera_id} did not complete"
            ))),
        }
    }

    /// Teardown without a row, used by camera deletion: the child is
    /// stopped and the tmp capture removed. No-op without a job.
    pub async fn abort(&self, camera_id: i64) -> Result<()> {
        let _guard = self.locks.lock(camera_id).await;

        let job = {
            let mut jobs = self.jobs.write().await;
            jobs.remove(&camera_id)
        };

        let Some(job) = job else {
            return Ok(());
        };

        if let Some(timer) = job.timer {
            timer.abort();
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if job.stop_tx.send(StopRequest::Abort(ack_tx)).await.is_ok() {
            let _ = tokio::time::timeout(Duration::from_secs(5), ack_rx).await;
        }
        let _ = tokio::fs::remove_file(&job.ts_path).await;

        tracing::info!(camera_id, "Recording aborted");
        Ok(())
    }

    pub async fn is_recording(&self, camera_id: i64) -> bool {
        self.jobs.read().await.contains_key(&camera_id)
    }

    /// Camera ids with a job in flight
    pub async fn recording_cameras(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.jobs.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn list(&self) -> Result<Vec<Recording>> {
        self.store.recordings.list().await
    }

    /// Remove the media file, then the thumbnail, then the row. Missing
    /// files are tolerated.
    pub async fn delete(&self, recording_id: i64) -> Result<()> {
        let recording = self
            .store
            .recordings
            .get(recording_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Recording {recording_id} not found")))?;

        let media = self.recordings_dir.join(&recording.filename);
        if let Err(e) = tokio::fs::remove_file(&media).await {
            tracing::warn!(path = %media.display(), error = %e, "Media file already gone");
        }

        if let Some(thumb) = &recording.thumbnail {
            let thumb = self.thumbnails_dir.join(thumb);
            if let Err(e) = tokio::fs::remove_file(&thumb).await {
                tracing::warn!(path = %thumb.display(), error = %e, "Thumbnail already gone");
            }
        }

        self.store.recordings.delete(recording_id).await?;
        tracing::info!(recording_id, "Recording deleted");
        Ok(())
    }

    /// Stop every job within the shutdown budget.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.jobs.read().await.keys().copied().collect();
        if ids.is_empty() {
            return;
        }

        tracing::info!(count = ids.len(), "Stopping all recordings");
        let stops = ids.into_iter().map(|id| self.stop(id));
        if tokio::time::timeout(SHUTDOWN_BUDGET, futures::future::join_all(stops))
            .await
            .is_err()
        {
            tracing::warn!("Shutdown budget exceeded, remaining recorders will be killed");
        }
    }
}

struct FinalizeContext {
    ffmpeg_bin: String,
    ts_path: PathBuf,
    mp4_path: PathBuf,
    thumb_path: PathBuf,
    started_at: DateTime<Utc>,
    store: MetadataStore,
    hub: Arc<RealtimeHub>,
}

/// Owns the recorder child: finalizes on request, aborts on camera
/// deletion, or cleans the job map when the child dies on its own (the tmp
/// capture is left behind for inspection).
async fn watch_recorder(
    camera_id: i64,
    mut child: Child,
    mut stop_rx: mpsc::Receiver<StopRequest>,
    ctx: FinalizeContext,
    jobs: Arc<RwLock<HashMap<i64, RecordingJob>>>,
) {
    tokio::select! {
        status = child.wait() => {
            {
                let mut jobs = jobs.write().await;
                jobs.remove(&camera_id);
            }
            let status = match status {
                Ok(s) => s.to_string(),
                Err(e) => e.to_string(),
            };
            tracing::error!(
                camera_id,
                status = %status,
                ts = %ctx.ts_path.display(),
                "Recorder died unexpectedly, capture left in tmp"
            );
        }
        request = stop_rx.recv() => match request {
            Some(StopRequest::Finalize(reply)) => {
                child::stop(&mut child).await;
                let result = finalize(camera_id, &ctx).await;
                if let Err(e) = &result {
                    tracing::error!(camera_id, error = %e, "Finalize failed, capture left in tmp");
                }
                let _ = reply.send(result);
            }
            Some(StopRequest::Abort(reply)) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                let _ = reply.send(());
            }
            None => {
                let _ = child.kill().await;
            }
        }
    }
}

/// Remux to faststart MP4, render the thumbnail, insert the row, drop the
/// tmp capture, emit `recording-finalized`. Any failure before the row
/// insert leaves the `.ts` behind and inserts nothing.
async fn finalize(camera_id: i64, ctx: &FinalizeContext) -> Result<i64> {
    let end_time = Utc::now();

    let remux_args: Vec<String> = vec![
        "-y".into(),
        "-i".into(),
        ctx.ts_path.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
        "-movflags".into(),
        "+faststart".into(),
        ctx.mp4_path.to_string_lossy().into_owned(),
    ];
    child::run_to_completion(&ctx.ffmpeg_bin, &remux_args, "remux").await?;

    // 320x180 box, aspect preserved, one frame at t=1s
    let thumb_args: Vec<String> = vec![
        "-y".into(),
        "-ss".into(),
        "1".into(),
        "-i".into(),
        ctx.mp4_path.to_string_lossy().into_owned(),
        "-frames:v".into(),
        "1".into(),
        "-vf".into(),
        "scale=320:180:force_original_aspect_ratio=decrease".into(),
        ctx.thumb_path.to_string_lossy().into_owned(),
    ];
    child::run_to_completion(&ctx.ffmpeg_bin, &thumb_args, "thumbnail").await?;

    let filename = ctx
        .mp4_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Internal("Recording path has no file name".into()))?;
    let thumbnail = ctx
        .thumb_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let recording_id = ctx
        .store
        .recordings
        .insert(
            camera_id,
            &filename,
            thumbnail.as_deref(),
            ctx.started_at,
            end_time,
        )
        .await?;

    let _ = tokio::fs::remove_file(&ctx.ts_path).await;

    ctx.hub.recording_finalized(recording_id, camera_id);
    Ok(recording_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_hub::HubMessage;
    use crate::store::{NewCamera, UpdateEncoderSettings};

    const STUB_LONG: &str = "#!/bin/sh\ncase \"$*\" in\n  *hls*|*mpegts*) sleep 30 ;;\n  *) exit 0 ;;\nesac\n";

    struct TestEnv {
        root: PathBuf,
        manager: Arc<RecordingManager>,
        store: MetadataStore,
        hub: Arc<RealtimeHub>,
    }

    impl Drop for TestEnv {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    async fn test_env(stub: &str) -> TestEnv {
        use std::os::unix::fs::PermissionsExt;

        let root = std::env::temp_dir().join(format!("camhub-rec-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();

        let bin = root.join("transcoder.sh");
        std::fs::write(&bin, stub).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        let bin_str = bin.to_string_lossy().into_owned();

        let store = MetadataStore::open_in_memory().await.unwrap();
        store
            .encoder_settings
            .update(&UpdateEncoderSettings {
                encoder_mode: Some("CpuOnly".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let hub = Arc::new(RealtimeHub::new());
        let onvif = Arc::new(OnvifClient::new());
        let encoder = Arc::new(EncoderSelector::new(
            bin_str.clone(),
            store.encoder_settings.clone(),
        ));
        let supervisor = Arc::new(StreamSupervisor::new(
            root.join("hls"),
            bin_str.clone(),
            "http://127.0.0.1:3001",
            onvif.clone(),
            encoder.clone(),
            hub.clone(),
        ));

        let manager = Arc::new(RecordingManager::new(
            bin_str,
            root.join("recordings").join("tmp"),
            root.join("recordings"),
            root.join("thumbnails"),
            store.clone(),
            onvif,
            encoder,
            hub.clone(),
            supervisor,
        ));

        TestEnv {
            root,
            manager,
            store,
            hub,
        }
    }

    async fn insert_camera(store: &MetadataStore) -> Camera {
        store
            .cameras
            .insert(&NewCamera {
                name: "Cam1".into(),
                kind: CameraKind::Rtsp,
                host: "192.0.2.10".into(),
                port: 554,
                user: None,
                pass: None,
                xaddr: None,
                stream_path: Some("/stream1".into()),
                device_node: None,
                pixel_format: None,
                width: None,
                height: None,
                fps: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn record_stop_finalizes_row_and_emits_event() {
        let env = test_env(STUB_LONG).await;
        let camera = insert_camera(&env.store).await;
        let mut rx = env.hub.subscribe();

        env.manager
            .start(&camera, RecordingOptions::default())
            .await
            .unwrap();
        assert!(env.manager.is_recording(camera.id).await);
        assert_eq!(env.manager.recording_cameras().await, vec![camera.id]);

        let id = env.manager.stop(camera.id).await.unwrap().unwrap();
        assert!(!env.manager.is_recording(camera.id).await);

        let recordings = env.manager.list().await.unwrap();
        assert_eq!(recordings.len(), 1);
        assert_eq!(recordings[0].id, id);
        assert_eq!(recordings[0].camera_id, camera.id);
        assert!(recordings[0].end_time >= recordings[0].start_time);
        assert!(recordings[0].filename.ends_with(".mp4"));

        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            HubMessage::RecordingFinalized(msg) => {
                assert_eq!(msg.recording_id, id);
                assert_eq!(msg.camera_id, camera.id);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let env = test_env(STUB_LONG).await;
        let camera = insert_camera(&env.store).await;

        env.manager
            .start(&camera, RecordingOptions::default())
            .await
            .unwrap();
        let err = env
            .manager
            .start(&camera, RecordingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));

        // Still exactly one job
        assert_eq!(env.manager.recording_cameras().await.len(), 1);
        env.manager.stop(camera.id).await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_job_is_idempotent_success() {
        let env = test_env(STUB_LONG).await;
        assert_eq!(env.manager.stop(42).await.unwrap(), None);
        assert_eq!(env.manager.stop(42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn abort_discards_capture_without_a_row() {
        let env = test_env(STUB_LONG).await;
        let camera = insert_camera(&env.store).await;

        env.manager
            .start(&camera, RecordingOptions::default())
            .await
            .unwrap();
        env.manager.abort(camera.id).await.unwrap();

        assert!(!env.manager.is_recording(camera.id).await);
        assert!(env.manager.list().await.unwrap().is_empty());

        // tmp dir holds no leftover capture
        let mut entries = tokio::fs::read_dir(env.root.join("recordings").join("tmp"))
            .await
            .unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_tolerates_missing_files() {
        let env = test_env(STUB_LONG).await;
        let camera = insert_camera(&env.store).await;

        let start = Utc::now();
        let id = env
            .store
            .recordings
            .insert(camera.id, "1_gone.mp4", Some("1_gone.jpg"), start, start)
            .await
            .unwrap();

        env.manager.delete(id).await.unwrap();
        assert!(env.store.recordings.get(id).await.unwrap().is_none());

        let err = env.manager.delete(id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
