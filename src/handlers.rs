use crate::errors::{AppError, ErrorBody};
use crate::models::*;
use crate::store::{
    page_bounds, AbsenceStore, AgentRegistry, AssignmentLog, LeadQueueStore, QueueStore,
};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Queue, absence and assignment-log storage.
    pub store: Arc<dyn LeadQueueStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn LeadQueueStore>) -> Self {
        Self { store }
    }
}

/// Query parameters for paging assignment history.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Page size, 1 to 500 (default 50).
    pub limit: Option<i64>,
    /// Entries to skip (default 0).
    pub offset: Option<i64>,
}

/// Query parameters for listing absences.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AbsenceQuery {
    /// Only absences of this agent.
    pub agent_id: Option<Uuid>,
    /// Only absences ending after this instant.
    pub from: Option<chrono::DateTime<Utc>>,
    /// Only absences starting before this instant.
    pub to: Option<chrono::DateTime<Utc>>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-roleta-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// GET /api/v1/units
#[utoipa::path(
    get,
    path = "/api/v1/units",
    tag = "units",
    responses((status = 200, description = "All units", body = [Unit]))
)]
pub async fn list_units(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Unit>>, AppError> {
    Ok(Json(state.store.list_units().await?))
}

/// GET /api/v1/units/:unit_id
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}",
    tag = "units",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    responses(
        (status = 200, description = "Unit", body = Unit),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn get_unit(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Unit>, AppError> {
    let Path(unit_id) = path?;
    Ok(Json(state.store.get_unit(unit_id).await?))
}

/// GET /api/v1/units/:unit_id/agents
///
/// Registry view: the unit's members and whether each is absent right now.
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}/agents",
    tag = "units",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    responses(
        (status = 200, description = "Unit members", body = [UnitMember]),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn list_unit_agents(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<UnitMember>>, AppError> {
    let Path(unit_id) = path?;
    Ok(Json(state.store.list_members(unit_id, Utc::now()).await?))
}

/// GET /api/v1/units/:unit_id/queue
///
/// Read-only projection of the queue for the dashboard. May trail an in-flight rotation.
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}/queue",
    tag = "queue",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    responses(
        (status = 200, description = "Queue in position order", body = QueueView),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn get_queue_view(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<QueueView>, AppError> {
    let Path(unit_id) = path?;
    Ok(Json(queue_view(&state, unit_id).await?))
}

async fn queue_view(state: &AppState, unit_id: Uuid) -> Result<QueueView, AppError> {
    let unit = state.store.get_unit(unit_id).await?;
    let now = Utc::now();
    let entries = state.store.get_queue_view(unit_id, now).await?;

    Ok(QueueView {
        unit,
        entries,
        generated_at: now,
    })
}

/// PUT /api/v1/units/:unit_id/queue
///
/// Replaces the whole queue order (drag-and-drop reorder or initial setup).
#[utoipa::path(
    put,
    path = "/api/v1/units/{unit_id}/queue",
    tag = "queue",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    request_body = SetQueueRequest,
    responses(
        (status = 200, description = "Queue replaced", body = QueueView),
        (status = 400, description = "Unknown, inactive or duplicate agent", body = ErrorBody),
        (status = 404, description = "Unit not found", body = ErrorBody),
        (status = 503, description = "Unit busy", body = ErrorBody)
    )
)]
pub async fn set_queue(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SetQueueRequest>, JsonRejection>,
) -> Result<Json<QueueView>, AppError> {
    let Path(unit_id) = path?;
    let Json(payload) = payload?;
    tracing::info!(
        "PUT /units/{}/queue - {} agents",
        unit_id,
        payload.agent_ids.len()
    );

    state
        .store
        .replace_queue(unit_id, &payload.agent_ids)
        .await?;

    Ok(Json(queue_view(&state, unit_id).await?))
}

/// PUT /api/v1/units/:unit_id/active
#[utoipa::path(
    put,
    path = "/api/v1/units/{unit_id}/active",
    tag = "queue",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Updated unit", body = Unit),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn set_active(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Json<Unit>, AppError> {
    let Path(unit_id) = path?;
    let Json(payload) = payload?;
    let unit = state.store.set_active(unit_id, payload.active).await?;

    tracing::info!(
        "Queue for unit {} {}",
        unit_id,
        if unit.active { "enabled" } else { "disabled" }
    );
    Ok(Json(unit))
}

/// GET /api/v1/units/:unit_id/history
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}/history",
    tag = "history",
    params(("unit_id" = Uuid, Path, description = "Unit id"), HistoryQuery),
    responses(
        (status = 200, description = "Assignments, newest first", body = AssignmentPage),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn list_history(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<AssignmentPage>, AppError> {
    let Path(unit_id) = path?;
    let Query(params) = query?;
    let (limit, offset) = page_bounds(params.limit, params.offset);
    Ok(Json(
        state.store.list_assignments(unit_id, limit, offset).await?,
    ))
}

/// DELETE /api/v1/units/:unit_id/history
///
/// Administrative wipe of the unit's history. The live queue is untouched.
#[utoipa::path(
    delete,
    path = "/api/v1/units/{unit_id}/history",
    tag = "history",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    responses(
        (status = 200, description = "Number of entries removed"),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Path(unit_id) = path?;
    let removed = state.store.clear_assignments(unit_id).await?;
    tracing::warn!("Assignment history cleared for unit {} ({} entries)", unit_id, removed);

    Ok(Json(json!({ "unit_id": unit_id, "removed": removed })))
}

/// GET /api/v1/units/:unit_id/absences
#[utoipa::path(
    get,
    path = "/api/v1/units/{unit_id}/absences",
    tag = "absences",
    params(("unit_id" = Uuid, Path, description = "Unit id"), AbsenceQuery),
    responses(
        (status = 200, description = "Absences ordered by start", body = [Absence]),
        (status = 404, description = "Unit not found", body = ErrorBody)
    )
)]
pub async fn list_absences(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<AbsenceQuery>, QueryRejection>,
) -> Result<Json<Vec<Absence>>, AppError> {
    let Path(unit_id) = path?;
    let Query(params) = query?;
    let filter = AbsenceFilter {
        agent_id: params.agent_id,
        from: params.from,
        to: params.to,
    };
    Ok(Json(state.store.list_absences(unit_id, &filter).await?))
}

/// POST /api/v1/units/:unit_id/absences
#[utoipa::path(
    post,
    path = "/api/v1/units/{unit_id}/absences",
    tag = "absences",
    params(("unit_id" = Uuid, Path, description = "Unit id")),
    request_body = AbsenceRequest,
    responses(
        (status = 201, description = "Absence created", body = Absence),
        (status = 400, description = "Invalid interval or inactive agent", body = ErrorBody),
        (status = 404, description = "Unit or agent not found", body = ErrorBody)
    )
)]
pub async fn create_absence(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<AbsenceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Absence>), AppError> {
    let Path(unit_id) = path?;
    let Json(payload) = payload?;
    tracing::info!(
        "POST /units/{}/absences - agent {} from {} to {}",
        unit_id,
        payload.agent_id,
        payload.starts_at,
        payload.ends_at
    );

    let absence = state.store.create_absence(unit_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(absence)))
}

/// PUT /api/v1/units/:unit_id/absences/:absence_id
#[utoipa::path(
    put,
    path = "/api/v1/units/{unit_id}/absences/{absence_id}",
    tag = "absences",
    params(
        ("unit_id" = Uuid, Path, description = "Unit id"),
        ("absence_id" = Uuid, Path, description = "Absence id")
    ),
    request_body = AbsenceRequest,
    responses(
        (status = 200, description = "Absence updated", body = Absence),
        (status = 400, description = "Invalid interval or inactive agent", body = ErrorBody),
        (status = 404, description = "Unit, agent or absence not found", body = ErrorBody)
    )
)]
pub async fn update_absence(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
    payload: Result<Json<AbsenceRequest>, JsonRejection>,
) -> Result<Json<Absence>, AppError> {
    let Path((unit_id, absence_id)) = path?;
    let Json(payload) = payload?;
    Ok(Json(
        state
            .store
            .update_absence(unit_id, absence_id, &payload)
            .await?,
    ))
}

/// DELETE /api/v1/units/:unit_id/absences/:absence_id
#[utoipa::path(
    delete,
    path = "/api/v1/units/{unit_id}/absences/{absence_id}",
    tag = "absences",
    params(
        ("unit_id" = Uuid, Path, description = "Unit id"),
        ("absence_id" = Uuid, Path, description = "Absence id")
    ),
    responses(
        (status = 204, description = "Absence deleted"),
        (status = 404, description = "Absence not found", body = ErrorBody)
    )
)]
pub async fn delete_absence(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(Uuid, Uuid)>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let Path((unit_id, absence_id)) = path?;
    state.store.delete_absence(unit_id, absence_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
