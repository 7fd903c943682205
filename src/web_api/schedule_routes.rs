//! Recording schedule routes
//!
//! Every mutation fully re-registers the schedule with the engine, so the
//! invariant "exactly one registration per enabled schedule" holds across
//! create, edit, toggle and delete.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::models::ApiResponse;
use crate::scheduler::validate_cron;
use crate::state::AppState;
use crate::store::{NewSchedule, Schedule, UpdateSchedule};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/schedules", get(get_schedules))
        .route("/api/schedules", post(add_schedule))
        .route("/api/schedules/:id", put(update_schedule))
        .route("/api/schedules/:id", delete(delete_schedule))
        .route("/api/schedules/:id/toggle", post(toggle_schedule))
}

async fn get_schedules(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let schedules = state.store.schedules.list().await?;
    Ok(Json(ApiResponse::success(schedules)))
}

async fn add_schedule(
    State(state): State<AppState>,
    Json(new): Json<NewSchedule>,
) -> Result<impl IntoResponse> {
    // The camera must exist before a schedule may reference it
    state
        .store
        .cameras
        .get(new.camera_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Camera {} not found", new.camera_id)))?;

    let normalized = validate_cron(&new.cron_expression)?;
    let schedule = state.store.schedules.insert(&new, &normalized).await?;

    if schedule.is_enabled {
        state
            .scheduler
            .register(&schedule, &state.store, &state.recorder)
            .await?;
    }

    tracing::info!(
        schedule_id = schedule.id,
        name = %schedule.name,
        "Schedule created"
    );
    Ok(Json(refetch(&state, schedule).await?))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateSchedule>,
) -> Result<impl IntoResponse> {
    let normalized = match &patch.cron_expression {
        Some(expression) => Some(validate_cron(expression)?),
        None => None,
    };

    let schedule = state
        .store
        .schedules
        .update(id, &patch, normalized.as_deref())
        .await?;

    state
        .scheduler
        .reconcile(&schedule, &state.store, &state.recorder)
        .await?;

    tracing::info!(schedule_id = id, name = %schedule.name, "Schedule updated");
    Ok(Json(refetch(&state, schedule).await?))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.scheduler.unregister(id).await;
    state.store.schedules.delete(id).await?;

    tracing::info!(schedule_id = id, "Schedule deleted");
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct TogglePayload {
    enabled: bool,
}

async fn toggle_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TogglePayload>,
) -> Result<impl IntoResponse> {
    let schedule = state
        .store
        .schedules
        .update(
            id,
            &UpdateSchedule {
                is_enabled: Some(payload.enabled),
                ..Default::default()
            },
            None,
        )
        .await?;

    state
        .scheduler
        .reconcile(&schedule, &state.store, &state.recorder)
        .await?;

    tracing::info!(schedule_id = id, enabled = payload.enabled, "Schedule toggled");
    Ok(Json(refetch(&state, schedule).await?))
}

/// Re-read after registration so the response carries the derived
/// `next_run_at`.
async fn refetch(state: &AppState, schedule: Schedule) -> Result<Schedule> {
    Ok(state
        .store
        .schedules
        .get(schedule.id)
        .await?
        .unwrap_or(schedule))
}
