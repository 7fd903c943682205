//! Schedule engine
//!
//! ## Responsibilities
//!
//! - Validate 5-field POSIX cron expressions and normalize them to the
//!   6-field form the engine evaluates (leading seconds)
//! - Keep exactly one registration per enabled schedule, reconciled on
//!   every mutation and at process start
//! - Fire bounded recordings in Asia/Tokyo, dropping ticks whose camera is
//!   already recording or no longer exists
//! - Write the derived next-fire instant back for UI display
//!
//! The recording manager is passed into each registration's callback
//! instead of being owned here, which keeps the scheduler and the manager
//! free of mutual references.

use crate::error::{Error, Result};
use crate::recording::{RecordingManager, RecordingOptions};
use crate::store::{MetadataStore, Schedule};
use chrono_tz::Asia::Tokyo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct ScheduleEngine {
    scheduler: JobScheduler,
    /// schedule id -> registered job uuid
    jobs: Mutex<HashMap<i64, Uuid>>,
}

impl ScheduleEngine {
    pub async fn new() -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Internal(format!("Failed to create scheduler: {e}")))?;
        scheduler
            .start()
            .await
            .map_err(|e| Error::Internal(format!("Failed to start scheduler: {e}")))?;

        tracing::info!("Schedule engine started (timezone Asia/Tokyo)");

        Ok(Self {
            scheduler,
            jobs: Mutex::new(HashMap::new()),
        })
    }

    /// Register every enabled schedule at startup and refresh their
    /// next-fire instants.
    pub async fn load_all(
        &self,
        store: &MetadataStore,
        recorder: &Arc<RecordingManager>,
    ) -> Result<()> {
        let schedules = store.schedules.list().await?;
        let mut registered = 0;

        for schedule in &schedules {
            if schedule.is_enabled {
                self.register(schedule, store, recorder).await?;
                registered += 1;
            } else {
                store.schedules.set_next_run(schedule.id, None).await?;
            }
        }

        tracing::info!(
            total = schedules.len(),
            registered,
            "Schedules loaded from store"
        );
        Ok(())
    }

    /// Register one schedule with the engine. An existing registration for
    /// the same schedule id is replaced.
    pub async fn register(
        &self,
        schedule: &Schedule,
        store: &MetadataStore,
        recorder: &Arc<RecordingManager>,
    ) -> Result<()> {
        self.unregister(schedule.id).await;

        let schedule_id = schedule.id;
        let camera_id = schedule.camera_id;
        let duration = schedule.duration_minutes;
        let fps = schedule.fps;
        let name = schedule.name.clone();
        let store_for_job = store.clone();
        let recorder_for_job = recorder.clone();

        let job = Job::new_async_tz(schedule.cron_expression.as_str(), Tokyo, move |_uuid, _lock| {
            let store = store_for_job.clone();
            let recorder = recorder_for_job.clone();
            let name = name.clone();

            Box::pin(async move {
                run_tick(&store, &recorder, schedule_id, camera_id, duration, fps, &name).await;
            })
        })
        .map_err(|e| Error::InvalidInput(format!("Invalid cron expression: {e}")))?;

        let job_id = job.guid();
        self.scheduler
            .add(job)
            .await
            .map_err(|e| Error::Internal(format!("Failed to add schedule job: {e}")))?;

        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(schedule_id, job_id);
        }

        // Derived next fire, written back for display
        let next = self.next_run(schedule_id).await;
        store.schedules.set_next_run(schedule_id, next).await?;

        tracing::info!(
            schedule_id,
            camera_id,
            cron = %schedule.cron_expression,
            next_run = ?next,
            "Schedule registered"
        );
        Ok(())
    }

    /// Drop a schedule's registration, if any.
    pub async fn unregister(&self, schedule_id: i64) {
        let job_id = {
            let mut jobs = self.jobs.lock().await;
            jobs.remove(&schedule_id)
        };

        if let Some(job_id) = job_id {
            if let Err(e) = self.scheduler.remove(&job_id).await {
                tracing::warn!(schedule_id, error = %e, "Failed to remove schedule job");
            } else {
                tracing::info!(schedule_id, "Schedule unregistered");
            }
        }
    }

    /// Full re-register after a mutation: drop the old handle, register
    /// again when enabled, refresh the stored next fire.
    pub async fn reconcile(
        &self,
        schedule: &Schedule,
        store: &MetadataStore,
        recorder: &Arc<RecordingManager>,
    ) -> Result<()> {
        if schedule.is_enabled {
            self.register(schedule, store, recorder).await
        } else {
            self.unregister(schedule.id).await;
            store.schedules.set_next_run(schedule.id, None).await
        }
    }

    /// The engine's next tick for a registered schedule.
    pub async fn next_run(&self, schedule_id: i64) -> Option<chrono::DateTime<chrono::Utc>> {
        let job_id = {
            let jobs = self.jobs.lock().await;
            jobs.get(&schedule_id).copied()
        }?;

        let mut scheduler = self.scheduler.clone();
        match scheduler.next_tick_for_job(job_id).await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(schedule_id, error = %e, "Could not derive next fire");
                None
            }
        }
    }

    /// Number of live registrations (one per enabled schedule).
    pub async fn registration_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_registered(&self, schedule_id: i64) -> bool {
        self.jobs.lock().await.contains_key(&schedule_id)
    }
}

/// One cron tick: skip if the camera is mid-recording or its row is gone,
/// otherwise start a duration-bounded recording.
async fn run_tick(
    store: &MetadataStore,
    recorder: &Arc<RecordingManager>,
    schedule_id: i64,
    camera_id: i64,
    duration_minutes: i64,
    fps: Option<i64>,
    name: &str,
) {
    if recorder.is_recording(camera_id).await {
        tracing::warn!(
            schedule_id,
            camera_id,
            name,
            "Tick dropped: camera already recording"
        );
        return;
    }

    let camera = match store.cameras.get(camera_id).await {
        Ok(Some(camera)) => camera,
        Ok(None) => {
            tracing::warn!(schedule_id, camera_id, name, "Tick dropped: camera row gone");
            return;
        }
        Err(e) => {
            tracing::error!(schedule_id, camera_id, error = %e, "Tick failed to load camera");
            return;
        }
    };

    tracing::info!(schedule_id, camera_id, name, duration_minutes, "Schedule fired");

    let options = RecordingOptions {
        fps,
        duration_minutes: Some(duration_minutes),
    };
    if let Err(e) = recorder.start(&camera, options).await {
        tracing::error!(
            schedule_id,
            camera_id,
            error = %e,
            "Scheduled recording failed to start"
        );
    }
}

/// Validate a 5-field POSIX cron expression and normalize it to the
/// 6-field form (leading `0` seconds) the engine evaluates. Validation
/// uses the engine's own parser so accept/reject never drifts from what
/// actually runs.
pub fn validate_cron(expression: &str) -> Result<String> {
    let fields = expression.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {expression}"),
        6 => expression.to_string(),
        _ => {
            return Err(Error::InvalidInput(format!(
                "Cron expression must have 5 fields, got {fields}"
            )))
        }
    };

    Job::new_async_tz(normalized.as_str(), Tokyo, |_uuid, _lock| {
        Box::pin(async move {
            // Parse-only; this job is never registered
        })
    })
    .map(|_| normalized)
    .map_err(|e| Error::InvalidInput(format!("Invalid cron expression: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderSelector;
    use crate::onvif::OnvifClient;
    use crate::realtime_hub::RealtimeHub;
    use crate::store::{NewSchedule, UpdateEncoderSettings};
    use crate::stream_supervisor::StreamSupervisor;

    #[test]
    fn five_field_cron_gains_seconds() {
        assert_eq!(validate_cron("0 9 * * *").unwrap(), "0 0 9 * * *");
        assert_eq!(validate_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(validate_cron("0 9 * * 1-5").unwrap(), "0 0 9 * * 1-5");
    }

    #[test]
    fn four_field_cron_is_rejected() {
        assert!(validate_cron("9 * * *").is_err());
        assert!(validate_cron("").is_err());
    }

    #[test]
    fn garbage_cron_is_rejected() {
        assert!(validate_cron("61 25 * * *").is_err());
        assert!(validate_cron("not a cron * * *").is_err());
    }

    #[test]
    fn six_field_cron_passes_through() {
        assert_eq!(validate_cron("30 0 9 * * *").unwrap(), "30 0 9 * * *");
    }

    async fn recorder_fixture(store: &MetadataStore) -> Arc<RecordingManager> {
        store
            .encoder_settings
            .update(&UpdateEncoderSettings {
                encoder_mode: Some("CpuOnly".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let root = std::env::temp_dir().join(format!("camhub-sched-{}", uuid::Uuid::new_v4()));
        let hub = Arc::new(RealtimeHub::new());
        let onvif = Arc::new(OnvifClient::new());
        let encoder = Arc::new(EncoderSelector::new(
            "ffmpeg",
            store.encoder_settings.clone(),
        ));
        let supervisor = Arc::new(StreamSupervisor::new(
            root.join("hls"),
            "ffmpeg",
            "http://127.0.0.1:3001",
            onvif.clone(),
            encoder.clone(),
            hub.clone(),
        ));

        Arc::new(RecordingManager::new(
            "ffmpeg",
            root.join("recordings").join("tmp"),
            root.join("recordings"),
            root.join("thumbnails"),
            store.clone(),
            onvif,
            encoder,
            hub,
            supervisor,
        ))
    }

    fn nightly(camera_id: i64) -> NewSchedule {
        NewSchedule {
            camera_id,
            name: "Nightly".into(),
            cron_expression: "0 9 * * *".into(),
            duration_minutes: 30,
            fps: None,
            is_enabled: true,
        }
    }

    async fn insert_camera(store: &MetadataStore) -> i64 {
        store
            .cameras
            .insert(&crate::store::NewCamera {
                name: "Cam1".into(),
                kind: crate::store::CameraKind::Rtsp,
                host: "192.0.2.10".into(),
                port: 554,
                user: None,
                pass: None,
                xaddr: None,
                stream_path: Some("/s1".into()),
                device_node: None,
                pixel_format: None,
                width: None,
                height: None,
                fps: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn register_toggle_round_trip() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let recorder = recorder_fixture(&store).await;
        let engine = ScheduleEngine::new().await.unwrap();
        let camera_id = insert_camera(&store).await;

        let normalized = validate_cron("0 9 * * *").unwrap();
        let schedule = store
            .schedules
            .insert(&nightly(camera_id), &normalized)
            .await
            .unwrap();

        engine.register(&schedule, &store, &recorder).await.unwrap();
        assert_eq!(engine.registration_count().await, 1);
        assert!(engine.is_registered(schedule.id).await);

        let first_next = engine.next_run(schedule.id).await;
        assert!(first_next.is_some());
        let stored = store.schedules.get(schedule.id).await.unwrap().unwrap();
        assert!(stored.next_run_at.is_some());

        // Disable: registration disappears, next fire cleared
        let disabled = store
            .schedules
            .update(
                schedule.id,
                &crate::store::UpdateSchedule {
                    is_enabled: Some(false),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        engine.reconcile(&disabled, &store, &recorder).await.unwrap();
        assert_eq!(engine.registration_count().await, 0);
        assert!(store
            .schedules
            .get(schedule.id)
            .await
            .unwrap()
            .unwrap()
            .next_run_at
            .is_none());

        // Re-enable: an equivalent registration returns (same next fire
        // for the same clock, same cron)
        let enabled = store
            .schedules
            .update(
                schedule.id,
                &crate::store::UpdateSchedule {
                    is_enabled: Some(true),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        engine.reconcile(&enabled, &store, &recorder).await.unwrap();
        assert_eq!(engine.registration_count().await, 1);
        let second_next = engine.next_run(schedule.id).await;
        assert_eq!(first_next, second_next);
    }

    #[tokio::test]
    async fn re_register_replaces_not_duplicates() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let recorder = recorder_fixture(&store).await;
        let engine = ScheduleEngine::new().await.unwrap();
        let camera_id = insert_camera(&store).await;

        let normalized = validate_cron("0 9 * * *").unwrap();
        let schedule = store
            .schedules
            .insert(&nightly(camera_id), &normalized)
            .await
            .unwrap();

        engine.register(&schedule, &store, &recorder).await.unwrap();
        engine.register(&schedule, &store, &recorder).await.unwrap();
        assert_eq!(engine.registration_count().await, 1);
    }

    #[tokio::test]
    async fn load_all_registers_only_enabled() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let recorder = recorder_fixture(&store).await;
        let engine = ScheduleEngine::new().await.unwrap();
        let camera_id = insert_camera(&store).await;

        let normalized = validate_cron("0 9 * * *").unwrap();
        store
            .schedules
            .insert(&nightly(camera_id), &normalized)
            .await
            .unwrap();
        let mut disabled = nightly(camera_id);
        disabled.name = "Disabled".into();
        disabled.is_enabled = false;
        store.schedules.insert(&disabled, &normalized).await.unwrap();

        engine.load_all(&store, &recorder).await.unwrap();
        assert_eq!(engine.registration_count().await, 1);
    }
}
