use crate::errors::{AppError, ErrorBody};
use crate::handlers::AppState;
use crate::rotation::RotationRequest;
use crate::store::RotationStore;
use crate::webhook_models::{TriggerQuery, TriggerResponse};
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Roleta trigger
///
/// Called by the lead intake flow when a lead arrives for a unit. Selects the first
/// eligible agent in the unit's queue, moves that agent to the tail and records the
/// assignment, all as one atomic step.
///
/// The rotation runs on its own task: once the unit lock is taken, a client that
/// disconnects mid-request cannot abort the commit halfway.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/roleta/{unit_id}",
    tag = "roleta",
    params(("unit_id" = Uuid, Path, description = "Unit receiving the lead"), TriggerQuery),
    responses(
        (status = 200, description = "Lead assigned", body = TriggerResponse),
        (status = 400, description = "Malformed unit id, or queue disabled, empty or without eligible agents", body = ErrorBody),
        (status = 404, description = "Unit not found", body = ErrorBody),
        (status = 503, description = "Unit busy or storage unavailable, retry later", body = ErrorBody)
    )
)]
pub async fn trigger_rotation(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<TriggerQuery>, QueryRejection>,
) -> Result<(StatusCode, Json<TriggerResponse>), AppError> {
    let Path(unit_id) = path?;
    let Query(query) = query?;
    let request = build_request(query);
    tracing::info!(
        "Roleta trigger for unit {} (lead: {})",
        unit_id,
        request.lead_id.as_deref().unwrap_or("-")
    );

    let store = state.store.clone();
    let assignment = tokio::spawn(async move { store.rotate(unit_id, &request).await })
        .await
        .map_err(|e| AppError::InternalError(format!("Rotation task failed: {}", e)))??;

    tracing::info!(
        "Lead assigned to {} ({}) in unit {} from position {}",
        assignment.agent.name,
        assignment.agent.id,
        unit_id,
        assignment.previous_position
    );

    Ok((StatusCode::OK, Json(TriggerResponse::from(assignment))))
}

fn build_request(query: TriggerQuery) -> RotationRequest {
    let request = RotationRequest::now();

    match query.lead_id.as_deref().map(str::trim) {
        Some(lead_id) if !lead_id.is_empty() => request.with_lead(lead_id),
        _ => request,
    }
}
