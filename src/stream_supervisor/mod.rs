//! Stream supervisor
//!
//! ## Responsibilities
//!
//! - Per-camera transcoder child lifecycle (spawn, watch, stop)
//! - Ownership of the per-camera HLS working directories
//! - At most one StreamSession per camera; start/stop strictly serialized
//! - Unexpected child exits become `stream-dead` events, never restarts
//!
//! `start` returns the manifest URL immediately; the manifest appears on
//! disk a second or two later, and the collaborator polls the URL until the
//! media server answers 2xx.

use crate::camera_locks::CameraLocks;
use crate::child;
use crate::encoder::EncoderSelector;
use crate::error::Result;
use crate::onvif::OnvifClient;
use crate::realtime_hub::RealtimeHub;
use crate::source;
use crate::store::Camera;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Global budget for stopping every session at shutdown
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);
/// How long `stop` waits for the watcher to confirm teardown
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Session lifecycle: Starting -> Running -> Stopping -> Dead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopping,
    Dead,
}

/// One live transcoder session
pub struct StreamSession {
    pub camera_id: i64,
    pub hls_dir: PathBuf,
    pub stream_url: String,
    pub encoder: String,
    pub started_at: DateTime<Utc>,
    state: Arc<RwLock<SessionState>>,
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
}

pub struct StreamSupervisor {
    hls_root: PathBuf,
    ffmpeg_bin: String,
    media_base_url: String,
    onvif: Arc<OnvifClient>,
    encoder: Arc<EncoderSelector>,
    hub: Arc<RealtimeHub>,
    sessions: Arc<RwLock<HashMap<i64, StreamSession>>>,
    locks: CameraLocks,
}

impl StreamSupervisor {
    pub fn new(
        hls_root: PathBuf,
        ffmpeg_bin: impl Into<String>,
        media_base_url: impl Into<String>,
        onvif: Arc<OnvifClient>,
        encoder: Arc<EncoderSelector>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            hls_root,
            ffmpeg_bin: ffmpeg_bin.into(),
            media_base_url: media_base_url.into(),
            onvif,
            encoder,
            hub,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            locks: CameraLocks::new(),
        }
    }

    /// Start (or join) the stream for a camera and return its manifest URL.
    ///
    /// Idempotent with respect to session existence: a second start while a
    /// session lives returns the same URL without touching the child.
    pub async fn start(&self, camera: &Camera) -> Result<String> {
        let _guard = self.locks.lock(camera.id).await;

        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(&camera.id) {
                tracing::debug!(camera_id = camera.id, "Stream already running");
                return Ok(session.stream_url.clone());
            }
        }

        // Reserve the working directory, truncating any prior contents
        let hls_dir = self.hls_root.join(camera.id.to_string());
        if hls_dir.exists() {
            tokio::fs::remove_dir_all(&hls_dir).await?;
        }
        tokio::fs::create_dir_all(&hls_dir).await?;

        let input = source::resolve_with_retry(camera, &self.onvif).await?;
        let profile = self.encoder.select().await?;
        let gop = input.fps_hint * 2;

        let manifest = hls_dir.join("stream.m3u8");
        let segments = hls_dir.join("segment_%05d.ts");

        let mut args: Vec<String> = vec!["-y".into()];
        args.extend(profile.input_args.iter().cloned());
        args.extend(input.args.iter().cloned());
        args.extend(profile.video_args.iter().cloned());
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
            "hls".into(),
            "-hls_time".into(),
            "2".into(),
            "-hls_list_size".into(),
            "6".into(),
            "-hls_flags".into(),
            "delete_segments".into(),
            "-hls_segment_filename".into(),
            segments.to_string_lossy().into_owned(),
            manifest.to_string_lossy().into_owned(),
        ]);

        let state = Arc::new(RwLock::new(SessionState::Starting));
        let mut spawned = child::spawn(&self.ffmpeg_bin, &args)?;

        if let Err(e) = child::confirm_started(&mut spawned).await {
            let _ = tokio::fs::remove_dir_all(&hls_dir).await;
            return Err(e);
        }
        *state.write().await = SessionState::Running;

        let stream_url = format!(
            "{}/hls/{}/stream.m3u8",
            self.media_base_url, camera.id
        );

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let session = StreamSession {
            camera_id: camera.id,
            hls_dir: hls_dir.clone(),
            stream_url: stream_url.clone(),
            encoder: profile.encoder.clone(),
            started_at: Utc::now(),
            state: state.clone(),
            stop_tx,
        };

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(camera.id, session);
        }

        tokio::spawn(watch_session(
            camera.id,
            spawned,
            stop_rx,
            state,
            hls_dir,
            self.sessions.clone(),
            self.hub.clone(),
        ));

        tracing::info!(
            camera_id = camera.id,
            encoder = %profile.encoder,
            url = %stream_url,
            "Stream started"
        );

        Ok(stream_url)
    }

    /// Stop the camera's stream. Calling without a session is success.
    pub async fn stop(&self, camera_id: i64) -> Result<()> {
        let _guard = self.locks.lock(camera_id).await;

        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&camera_id)
        };

        let Some(session) = session else {
            tracing::debug!(camera_id, "Stop with no session (no-op)");
            return Ok(());
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if session.stop_tx.send(ack_tx).await.is_ok() {
            // Watcher confirms once the child is gone and the dir removed
            let _ = tokio::time::timeout(STOP_ACK_TIMEOUT, ack_rx).await;
        }

        tracing::info!(camera_id, "Stream stopped");
        Ok(())
    }

    pub async fn is_streaming(&self, camera_id: i64) -> bool {
        self.sessions.read().await.contains_key(&camera_id)
    }

    pub async fn streaming_cameras(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn session_state(&self, camera_id: i64) -> Option<SessionState> {
        let sessions = self.sessions.read().await;
        match sessions.get(&camera_id) {
            Some(session) => Some(*session.state.read().await),
            None => None,
        }
    }

    /// Stop every session within the global shutdown budget. Survivors are
    /// force-killed by `kill_on_drop` at process exit.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.sessions.read().await.keys().copied().collect();
        if ids.is_empty() {
            return;
        }

        tracing::info!(count = ids.len(), "Stopping all streams");
        let stops = ids.into_iter().map(|id| self.stop(id));
        if tokio::time::timeout(SHUTDOWN_BUDGET, futures::future::join_all(stops))
            .await
            .is_err()
        {
            tracing::warn!("Shutdown budget exceeded, remaining transcoders will be killed");
        }
    }
}

/// Owns the child for the session's lifetime. Either a stop request arrives
/// (graceful teardown, acked) or the child exits on its own (session marked
/// dead, `stream-dead` emitted, no restart).
async fn watch_session(
    camera_id: i64,
    mut child: Child,
    mut stop_rx: mpsc::Receiver<oneshot::Sender<()>>,
    state: Arc<RwLock<SessionState>>,
    hls_dir: PathBuf,
    sessions: Arc<RwLock<HashMap<i64, StreamSession>>>,
    hub: Arc<RealtimeHub>,
) {
    tokio::select! {
        status = child.wait() => {
            *state.write().await = SessionState::Dead;
            {
                let mut sessions = sessions.write().await;
                sessions.remove(&camera_id);
            }

            let reason = match status {
                Ok(status) => format!("transcoder exited: {status}"),
                Err(e) => format!("transcoder wait failed: {e}"),
            };
            tracing::error!(camera_id, reason = %reason, "Stream died unexpectedly");
            hub.stream_dead(camera_id, reason);

            let _ = tokio::fs::remove_dir_all(&hls_dir).await;
        }
        request = stop_rx.recv() => {
            *state.write().await = SessionState::Stopping;
            child::stop(&mut child).await;
            *state.write().await = SessionState::Dead;

            let _ = tokio::fs::remove_dir_all(&hls_dir).await;

            if let Some(ack) = request {
                let _ = ack.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_hub::HubMessage;
    use crate::store::{CameraKind, MetadataStore, UpdateEncoderSettings};

    /// A stand-in transcoder: long-lived for pipeline invocations, instant
    /// success otherwise (probes, remuxes).
    const STUB_LONG: &str = "#!/bin/sh\ncase \"$*\" in\n  *hls*|*mpegts*) sleep 30 ;;\n  *) exit 0 ;;\nesac\n";
    /// A transcoder that crashes shortly after starting.
    const STUB_CRASH: &str = "#!/bin/sh\ncase \"$*\" in\n  *hls*|*mpegts*) sleep 1; exit 1 ;;\n  *) exit 0 ;;\nesac\n";

    struct TestEnv {
        root: PathBuf,
        supervisor: StreamSupervisor,
        hub: Arc<RealtimeHub>,
    }

    impl Drop for TestEnv {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    async fn test_env(stub: &str) -> TestEnv {
        use std::os::unix::fs::PermissionsExt;

        let root = std::env::temp_dir().join(format!("camhub-sup-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).unwrap();

        let bin = root.join("transcoder.sh");
        std::fs::write(&bin, stub).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

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
        let bin_str = bin.to_string_lossy().into_owned();
        let supervisor = StreamSupervisor::new(
            root.join("hls"),
            bin_str.clone(),
            "http://127.0.0.1:3001",
            Arc::new(OnvifClient::new()),
            Arc::new(EncoderSelector::new(bin_str, store.encoder_settings.clone())),
            hub.clone(),
        );

        TestEnv {
            root,
            supervisor,
            hub,
        }
    }

    fn rtsp_camera(id: i64) -> Camera {
        Camera {
            id,
            name: format!("Cam{id}"),
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_tears_down() {
        let env = test_env(STUB_LONG).await;
        let camera = rtsp_camera(1);

        let url = env.supervisor.start(&camera).await.unwrap();
        assert_eq!(url, "http://127.0.0.1:3001/hls/1/stream.m3u8");
        assert!(env.supervisor.is_streaming(1).await);
        assert_eq!(
            env.supervisor.session_state(1).await,
            Some(SessionState::Running)
        );

        // N starts, one session, same URL
        let again = env.supervisor.start(&camera).await.unwrap();
        assert_eq!(again, url);
        assert_eq!(env.supervisor.streaming_cameras().await, vec![1]);

        let hls_dir = env.root.join("hls").join("1");
        assert!(hls_dir.exists());

        env.supervisor.stop(1).await.unwrap();
        assert!(!env.supervisor.is_streaming(1).await);
        assert!(!hls_dir.exists());

        // M stops, no error after the first
        env.supervisor.stop(1).await.unwrap();
        env.supervisor.stop(1).await.unwrap();
    }

    #[tokio::test]
    async fn crash_emits_stream_dead_and_clears_session() {
        let env = test_env(STUB_CRASH).await;
        let camera = rtsp_camera(2);
        let mut rx = env.hub.subscribe();

        env.supervisor.start(&camera).await.unwrap();
        assert!(env.supervisor.is_streaming(2).await);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("stream-dead event")
            .unwrap();
        match event {
            HubMessage::StreamDead(msg) => {
                assert_eq!(msg.camera_id, 2);
                assert!(msg.reason.contains("exited"));
            }
            other => panic!("Unexpected event: {other:?}"),
        }

        // Watcher removed the session; no restart happens
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!env.supervisor.is_streaming(2).await);
    }

    #[tokio::test]
    async fn immediate_exit_is_a_start_error() {
        let env = test_env("#!/bin/sh\nexit 1\n").await;
        let camera = rtsp_camera(3);

        let err = env.supervisor.start(&camera).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::ProcessFailed(_)));
        assert!(!env.supervisor.is_streaming(3).await);
        assert!(!env.root.join("hls").join("3").exists());
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let env = test_env(STUB_LONG).await;
        env.supervisor.start(&rtsp_camera(1)).await.unwrap();
        env.supervisor.start(&rtsp_camera(2)).await.unwrap();
        assert_eq!(env.supervisor.streaming_cameras().await, vec![1, 2]);

        env.supervisor.shutdown().await;
        assert!(env.supervisor.streaming_cameras().await.is_empty());
    }
}
