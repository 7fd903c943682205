//! Entity repositories
//!
//! One repository per table, in the row-struct + `From` mapping style.
//! All writes go through the single-connection writer pool; reads use the
//! reader pool.

use super::types::{
    Camera, CameraKind, EncoderSettings, NewCamera, NewSchedule, Recording, Schedule,
    UpdateEncoderSettings, UpdateSchedule,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

// ========================================
// Cameras
// ========================================

#[derive(Clone)]
pub struct CameraRepository {
    reads: SqlitePool,
    writes: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct CameraRow {
    id: i64,
    name: String,
    kind: String,
    host: String,
    port: i64,
    user: Option<String>,
    pass: Option<String>,
    xaddr: Option<String>,
    stream_path: Option<String>,
    device_node: Option<String>,
    pixel_format: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    fps: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CameraRow> for Camera {
    type Error = Error;

    fn try_from(row: CameraRow) -> Result<Self> {
        Ok(Camera {
            id: row.id,
            name: row.name,
            kind: CameraKind::parse(&row.kind)?,
            host: row.host,
            port: row.port,
            user: row.user,
            pass: row.pass,
            xaddr: row.xaddr,
            stream_path: row.stream_path,
            device_node: row.device_node,
            pixel_format: row.pixel_format,
            width: row.width,
            height: row.height,
            fps: row.fps,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const CAMERA_COLUMNS: &str = "id, name, kind, host, port, user, pass, xaddr, stream_path, \
                              device_node, pixel_format, width, height, fps, created_at, updated_at";

impl CameraRepository {
    pub fn new(reads: SqlitePool, writes: SqlitePool) -> Self {
        Self { reads, writes }
    }

    pub async fn list(&self) -> Result<Vec<Camera>> {
        let rows = sqlx::query_as::<_, CameraRow>(&format!(
            "SELECT {CAMERA_COLUMNS} FROM cameras ORDER BY id"
        ))
        .fetch_all(&self.reads)
        .await?;

        rows.into_iter().map(Camera::try_from).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<Camera>> {
        let row = sqlx::query_as::<_, CameraRow>(&format!(
            "SELECT {CAMERA_COLUMNS} FROM cameras WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.reads)
        .await?;

        row.map(Camera::try_from).transpose()
    }

    pub async fn insert(&self, new: &NewCamera) -> Result<Camera> {
        new.validate()?;
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO cameras
                (name, kind, host, port, user, pass, xaddr, stream_path,
                 device_node, pixel_format, width, height, fps, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(&new.host)
        .bind(new.port)
        .bind(&new.user)
        .bind(&new.pass)
        .bind(&new.xaddr)
        .bind(&new.stream_path)
        .bind(&new.device_node)
        .bind(&new.pixel_format)
        .bind(new.width)
        .bind(new.height)
        .bind(new.fps)
        .bind(now)
        .bind(now)
        .execute(&self.writes)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Camera {id} vanished after insert")))
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM cameras WHERE id = ?")
            .bind(id)
            .execute(&self.writes)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Camera {id} not found")));
        }
        Ok(())
    }
}

// ========================================
// Recordings
// ========================================

#[derive(Clone)]
pub struct RecordingRepository {
    reads: SqlitePool,
    writes: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct RecordingRow {
    id: i64,
    camera_id: i64,
    filename: String,
    thumbnail: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    camera_name: Option<String>,
}

impl From<RecordingRow> for Recording {
    fn from(row: RecordingRow) -> Self {
        Recording {
            id: row.id,
            camera_id: row.camera_id,
            filename: row.filename,
            thumbnail: row.thumbnail,
            start_time: row.start_time,
            end_time: row.end_time,
            camera_name: row.camera_name,
        }
    }
}

impl RecordingRepository {
    pub fn new(reads: SqlitePool, writes: SqlitePool) -> Self {
        Self { reads, writes }
    }

    pub async fn list(&self) -> Result<Vec<Recording>> {
        let rows = sqlx::query_as::<_, RecordingRow>(
            "SELECT r.id, r.camera_id, r.filename, r.thumbnail, r.start_time, r.end_time,
                    c.name AS camera_name
             FROM recordings r
             LEFT JOIN cameras c ON r.camera_id = c.id
             ORDER BY r.start_time DESC",
        )
        .fetch_all(&self.reads)
        .await?;

        Ok(rows.into_iter().map(Recording::from).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Recording>> {
        let row = sqlx::query_as::<_, RecordingRow>(
            "SELECT r.id, r.camera_id, r.filename, r.thumbnail, r.start_time, r.end_time,
                    c.name AS camera_name
             FROM recordings r
             LEFT JOIN cameras c ON r.camera_id = c.id
             WHERE r.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.reads)
        .await?;

        Ok(row.map(Recording::from))
    }

    /// Insert at finalize time. `end_time >= start_time` is enforced here
    /// because no other writer path exists.
    pub async fn insert(
        &self,
        camera_id: i64,
        filename: &str,
        thumbnail: Option<&str>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<i64> {
        if end_time < start_time {
            return Err(Error::InvalidInput(
                "Recording end time precedes start time".into(),
            ));
        }

        let result = sqlx::query(
            "INSERT INTO recordings (camera_id, filename, thumbnail, start_time, end_time)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(camera_id)
        .bind(filename)
        .bind(thumbnail)
        .bind(start_time)
        .bind(end_time)
        .execute(&self.writes)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM recordings WHERE id = ?")
            .bind(id)
            .execute(&self.writes)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Recording {id} not found")));
        }
        Ok(())
    }
}

// ========================================
// Schedules
// ========================================

#[derive(Clone)]
pub struct ScheduleRepository {
    reads: SqlitePool,
    writes: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: i64,
    camera_id: i64,
    name: String,
    cron_expression: String,
    duration_minutes: i64,
    fps: Option<i64>,
    is_enabled: bool,
    next_run_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    camera_name: Option<String>,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            camera_id: row.camera_id,
            name: row.name,
            cron_expression: row.cron_expression,
            duration_minutes: row.duration_minutes,
            fps: row.fps,
            is_enabled: row.is_enabled,
            next_run_at: row.next_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            camera_name: row.camera_name,
        }
    }
}

const SCHEDULE_SELECT: &str = "SELECT s.id, s.camera_id, s.name, s.cron_expression,
            s.duration_minutes, s.fps, s.is_enabled, s.next_run_at,
            s.created_at, s.updated_at, c.name AS camera_name
     FROM schedules s
     LEFT JOIN cameras c ON s.camera_id = c.id";

impl ScheduleRepository {
    pub fn new(reads: SqlitePool, writes: SqlitePool) -> Self {
        Self { reads, writes }
    }

    pub async fn list(&self) -> Result<Vec<Schedule>> {
        let rows =
            sqlx::query_as::<_, ScheduleRow>(&format!("{SCHEDULE_SELECT} ORDER BY s.created_at"))
                .fetch_all(&self.reads)
                .await?;

        Ok(rows.into_iter().map(Schedule::from).collect())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!("{SCHEDULE_SELECT} WHERE s.id = ?"))
            .bind(id)
            .fetch_optional(&self.reads)
            .await?;

        Ok(row.map(Schedule::from))
    }

    /// Insert with an already-normalized cron expression (validation and
    /// 5-to-6-field normalization happen in the schedule engine).
    pub async fn insert(&self, new: &NewSchedule, normalized_cron: &str) -> Result<Schedule> {
        if new.duration_minutes <= 0 {
            return Err(Error::InvalidInput(
                "Schedule duration must be positive".into(),
            ));
        }
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO schedules
                (camera_id, name, cron_expression, duration_minutes, fps, is_enabled,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.camera_id)
        .bind(&new.name)
        .bind(normalized_cron)
        .bind(new.duration_minutes)
        .bind(new.fps)
        .bind(new.is_enabled)
        .bind(now)
        .bind(now)
        .execute(&self.writes)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Schedule {id} vanished after insert")))
    }

    pub async fn update(
        &self,
        id: i64,
        patch: &UpdateSchedule,
        normalized_cron: Option<&str>,
    ) -> Result<Schedule> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Schedule {id} not found")))?;

        if let Some(duration) = patch.duration_minutes {
            if duration <= 0 {
                return Err(Error::InvalidInput(
                    "Schedule duration must be positive".into(),
                ));
            }
        }

        sqlx::query(
            "UPDATE schedules
             SET name = ?, cron_expression = ?, duration_minutes = ?, fps = ?,
                 is_enabled = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(patch.name.as_deref().unwrap_or(&current.name))
        .bind(normalized_cron.unwrap_or(&current.cron_expression))
        .bind(patch.duration_minutes.unwrap_or(current.duration_minutes))
        .bind(patch.fps.or(current.fps))
        .bind(patch.is_enabled.unwrap_or(current.is_enabled))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.writes)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal(format!("Schedule {id} vanished after update")))
    }

    pub async fn set_next_run(&self, id: i64, next_run: Option<DateTime<Utc>>) -> Result<()> {
        sqlx::query("UPDATE schedules SET next_run_at = ? WHERE id = ?")
            .bind(next_run)
            .bind(id)
            .execute(&self.writes)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?")
            .bind(id)
            .execute(&self.writes)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Schedule {id} not found")));
        }
        Ok(())
    }
}

// ========================================
// Encoder settings
// ========================================

#[derive(Clone)]
pub struct EncoderSettingsRepository {
    reads: SqlitePool,
    writes: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct EncoderSettingsRow {
    id: i64,
    encoder_mode: String,
    gpu_encoder: Option<String>,
    cpu_encoder: String,
    preset: String,
    quality: i64,
}

impl From<EncoderSettingsRow> for EncoderSettings {
    fn from(row: EncoderSettingsRow) -> Self {
        EncoderSettings {
            id: row.id,
            encoder_mode: row.encoder_mode,
            gpu_encoder: row.gpu_encoder,
            cpu_encoder: row.cpu_encoder,
            preset: row.preset,
            quality: row.quality,
        }
    }
}

impl EncoderSettingsRepository {
    pub fn new(reads: SqlitePool, writes: SqlitePool) -> Self {
        Self { reads, writes }
    }

    pub async fn get(&self) -> Result<EncoderSettings> {
        let row = sqlx::query_as::<_, EncoderSettingsRow>(
            "SELECT id, encoder_mode, gpu_encoder, cpu_encoder, preset, quality
             FROM encoder_settings WHERE id = 1",
        )
        .fetch_one(&self.reads)
        .await?;

        Ok(row.into())
    }

    pub async fn update(&self, patch: &UpdateEncoderSettings) -> Result<EncoderSettings> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("No encoder fields to update".into()));
        }

        if let Some(mode) = &patch.encoder_mode {
            if !matches!(mode.as_str(), "Auto" | "GpuOnly" | "CpuOnly") {
                return Err(Error::InvalidInput(format!(
                    "Unknown encoder mode: {mode}"
                )));
            }
        }

        let current = self.get().await?;

        sqlx::query(
            "UPDATE encoder_settings
             SET encoder_mode = ?, gpu_encoder = ?, cpu_encoder = ?, preset = ?, quality = ?
             WHERE id = 1",
        )
        .bind(patch.encoder_mode.as_deref().unwrap_or(&current.encoder_mode))
        .bind(patch.gpu_encoder.as_deref().or(current.gpu_encoder.as_deref()))
        .bind(patch.cpu_encoder.as_deref().unwrap_or(&current.cpu_encoder))
        .bind(patch.preset.as_deref().unwrap_or(&current.preset))
        .bind(patch.quality.unwrap_or(current.quality))
        .execute(&self.writes)
        .await?;

        self.get().await
    }
}
