//! Schema migrations
//!
//! Forward-only and idempotent: every statement is safe to rerun on an
//! existing database, so startup always applies the full list.

use crate::error::Result;
use sqlx::SqlitePool;

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cameras (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        kind TEXT NOT NULL DEFAULT 'onvif',
        host TEXT NOT NULL,
        port INTEGER NOT NULL,
        user TEXT,
        pass TEXT,
        xaddr TEXT,
        stream_path TEXT,
        device_node TEXT,
        pixel_format TEXT,
        width INTEGER,
        height INTEGER,
        fps INTEGER,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS recordings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL,
        filename TEXT NOT NULL,
        thumbnail TEXT,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        FOREIGN KEY(camera_id) REFERENCES cameras(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        camera_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        cron_expression TEXT NOT NULL,
        duration_minutes INTEGER NOT NULL,
        fps INTEGER,
        is_enabled INTEGER NOT NULL DEFAULT 1,
        next_run_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        FOREIGN KEY(camera_id) REFERENCES cameras(id) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS encoder_settings (
        id INTEGER PRIMARY KEY,
        encoder_mode TEXT NOT NULL DEFAULT 'Auto',
        gpu_encoder TEXT,
        cpu_encoder TEXT NOT NULL DEFAULT 'libx264',
        preset TEXT NOT NULL DEFAULT 'ultrafast',
        quality INTEGER NOT NULL DEFAULT 23
    )",
    "INSERT OR IGNORE INTO encoder_settings (id) VALUES (1)",
    "CREATE INDEX IF NOT EXISTS idx_recordings_camera ON recordings(camera_id)",
    "CREATE INDEX IF NOT EXISTS idx_schedules_camera ON schedules(camera_id)",
];

pub async fn run(pool: &SqlitePool) -> Result<()> {
    for statement in MIGRATIONS {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::debug!(count = MIGRATIONS.len(), "Migrations applied");
    Ok(())
}
