//! Metadata store
//!
//! ## Responsibilities
//!
//! - Single embedded SQLite file under the data root
//! - Forward-only idempotent migrations on startup
//! - Writes serialized through a one-connection writer pool; reads
//!   concurrent through a reader pool
//! - Referential-integrity gate on camera deletion

mod migrations;
mod repository;
pub mod types;

pub use repository::{
    CameraRepository, EncoderSettingsRepository, RecordingRepository, ScheduleRepository,
};
pub use types::{
    Camera, CameraKind, EncoderSettings, LiveRefs, NewCamera, NewSchedule, Recording, Schedule,
    UpdateEncoderSettings, UpdateSchedule,
};

use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

/// Metadata store handle bundling the per-entity repositories
#[derive(Clone)]
pub struct MetadataStore {
    pub cameras: CameraRepository,
    pub recordings: RecordingRepository,
    pub schedules: ScheduleRepository,
    pub encoder_settings: EncoderSettingsRepository,
}

impl MetadataStore {
    /// Open (creating if missing) the database file and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let writes = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        let reads = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        migrations::run(&writes).await?;

        Ok(Self::from_pools(reads, writes))
    }

    /// In-memory store for tests; a single connection backs both roles.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        migrations::run(&pool).await?;

        Ok(Self::from_pools(pool.clone(), pool))
    }

    fn from_pools(reads: SqlitePool, writes: SqlitePool) -> Self {
        Self {
            cameras: CameraRepository::new(reads.clone(), writes.clone()),
            recordings: RecordingRepository::new(reads.clone(), writes.clone()),
            schedules: ScheduleRepository::new(reads.clone(), writes.clone()),
            encoder_settings: EncoderSettingsRepository::new(reads, writes),
        }
    }

    /// Delete a camera row after the caller certifies that no live stream
    /// session or recording job references it. Schedules and recordings
    /// cascade with the row.
    pub async fn delete_camera(&self, id: i64, live: LiveRefs) -> Result<()> {
        if live.streaming {
            return Err(Error::Conflict(format!(
                "Camera {id} still has an active stream session"
            )));
        }
        if live.recording {
            return Err(Error::Conflict(format!(
                "Camera {id} still has an active recording job"
            )));
        }
        self.cameras.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::types::{CameraKind, NewCamera, NewSchedule, UpdateSchedule};
    use super::*;
    use chrono::{Duration, Utc};

    fn rtsp_camera(name: &str) -> NewCamera {
        NewCamera {
            name: name.into(),
            kind: CameraKind::Rtsp,
            host: "192.0.2.10".into(),
            port: 554,
            user: Some("a".into()),
            pass: Some("b".into()),
            xaddr: None,
            stream_path: Some("/stream1".into()),
            device_node: None,
            pixel_format: None,
            width: None,
            height: None,
            fps: None,
        }
    }

    #[tokio::test]
    async fn camera_add_delete_round_trip() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let before = store.cameras.list().await.unwrap().len();

        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();
        assert_eq!(cam.kind, CameraKind::Rtsp);
        assert_eq!(store.cameras.list().await.unwrap().len(), before + 1);

        store
            .delete_camera(
                cam.id,
                LiveRefs {
                    streaming: false,
                    recording: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.cameras.list().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn delete_gate_rejects_live_references() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();

        let err = store
            .delete_camera(
                cam.id,
                LiveRefs {
                    streaming: true,
                    recording: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let err = store
            .delete_camera(
                cam.id,
                LiveRefs {
                    streaming: false,
                    recording: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Row untouched by the refused deletes
        assert!(store.cameras.get(cam.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn camera_delete_cascades_schedules_and_recordings() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();

        let start = Utc::now();
        store
            .recordings
            .insert(cam.id, "1_x.mp4", Some("1_x.jpg"), start, start)
            .await
            .unwrap();
        store
            .schedules
            .insert(
                &NewSchedule {
                    camera_id: cam.id,
                    name: "Nightly".into(),
                    cron_expression: "0 9 * * *".into(),
                    duration_minutes: 30,
                    fps: None,
                    is_enabled: true,
                },
                "0 0 9 * * *",
            )
            .await
            .unwrap();

        store
            .delete_camera(
                cam.id,
                LiveRefs {
                    streaming: false,
                    recording: false,
                },
            )
            .await
            .unwrap();

        assert!(store.recordings.list().await.unwrap().is_empty());
        assert!(store.schedules.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recording_rejects_end_before_start() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();

        let start = Utc::now();
        let err = store
            .recordings
            .insert(cam.id, "1_x.mp4", None, start, start - Duration::seconds(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(store.recordings.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_patch_preserves_unset_fields() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();

        let schedule = store
            .schedules
            .insert(
                &NewSchedule {
                    camera_id: cam.id,
                    name: "Nightly".into(),
                    cron_expression: "0 9 * * *".into(),
                    duration_minutes: 30,
                    fps: Some(15),
                    is_enabled: true,
                },
                "0 0 9 * * *",
            )
            .await
            .unwrap();

        let updated = store
            .schedules
            .update(
                schedule.id,
                &UpdateSchedule {
                    is_enabled: Some(false),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert!(!updated.is_enabled);
        assert_eq!(updated.name, "Nightly");
        assert_eq!(updated.cron_expression, "0 0 9 * * *");
        assert_eq!(updated.duration_minutes, 30);
        assert_eq!(updated.fps, Some(15));
    }

    #[tokio::test]
    async fn schedule_rejects_non_positive_duration() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let cam = store.cameras.insert(&rtsp_camera("Cam1")).await.unwrap();

        let err = store
            .schedules
            .insert(
                &NewSchedule {
                    camera_id: cam.id,
                    name: "Bad".into(),
                    cron_expression: "0 9 * * *".into(),
                    duration_minutes: 0,
                    fps: None,
                    is_enabled: true,
                },
                "0 0 9 * * *",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn encoder_settings_seeded_and_patchable() {
        let store = MetadataStore::open_in_memory().await.unwrap();

        let settings = store.encoder_settings.get().await.unwrap();
        assert_eq!(settings.encoder_mode, "Auto");
        assert_eq!(settings.cpu_encoder, "libx264");
        assert_eq!(settings.quality, 23);

        let updated = store
            .encoder_settings
            .update(&UpdateEncoderSettings {
                encoder_mode: Some("CpuOnly".into()),
                quality: Some(20),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.encoder_mode, "CpuOnly");
        assert_eq!(updated.quality, 20);
        assert_eq!(updated.preset, "ultrafast");

        let err = store
            .encoder_settings
            .update(&UpdateEncoderSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = store
            .encoder_settings
            .update(&UpdateEncoderSettings {
                encoder_mode: Some("Turbo".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
