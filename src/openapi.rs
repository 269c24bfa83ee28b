use axum::{http::StatusCode, response::IntoResponse, Json};
use utoipa::OpenApi;

use crate::errors::{ErrorBody, ErrorKind};
use crate::models::{
    Absence, AbsenceRequest, Agent, AgentProfile, AssignmentLogEntry, AssignmentPage,
    QueueEntry, QueueView, QueueViewEntry, SetActiveRequest, SetQueueRequest, Unit, UnitMember,
    UnitSummary,
};
use crate::webhook_models::TriggerResponse;
use crate::{handlers, webhook_handler};

/// OpenAPI document generated from the handler annotations.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Roleta API",
        description = "Per-unit round-robin distribution of incoming leads to sales agents"
    ),
    paths(
        webhook_handler::trigger_rotation,
        handlers::list_units,
        handlers::get_unit,
        handlers::list_unit_agents,
        handlers::get_queue_view,
        handlers::set_queue,
        handlers::set_active,
        handlers::list_history,
        handlers::clear_history,
        handlers::list_absences,
        handlers::create_absence,
        handlers::update_absence,
        handlers::delete_absence,
    ),
    components(schemas(
        ErrorBody,
        ErrorKind,
        Unit,
        Agent,
        QueueEntry,
        Absence,
        AssignmentLogEntry,
        QueueViewEntry,
        QueueView,
        UnitMember,
        AgentProfile,
        UnitSummary,
        AssignmentPage,
        SetQueueRequest,
        SetActiveRequest,
        AbsenceRequest,
        TriggerResponse,
    )),
    tags(
        (name = "roleta", description = "Lead-arrival trigger"),
        (name = "units", description = "Units and their agents"),
        (name = "queue", description = "Queue order and enable flag"),
        (name = "history", description = "Assignment log"),
        (name = "absences", description = "Agent absence periods")
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI document as JSON.
pub async fn serve_openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Serves the Swagger UI HTML page.
///
/// The page loads the bundle from a CDN and points it at `/api-docs/openapi.json`.
pub async fn serve_swagger_ui() -> impl IntoResponse {
    let html = r#"
<!DOCTYPE html>
<html lang="pt-BR">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Roleta API - Docs</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
    <style>
        body { margin: 0; padding: 0; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
    <script>
        window.onload = function() {
            window.ui = SwaggerUIBundle({
                url: "/api-docs/openapi.json",
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [SwaggerUIBundle.presets.apis]
            });
        };
    </script>
</body>
</html>
"#;
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_trigger_and_management_routes() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;

        assert!(paths.contains_key("/api/v1/webhooks/roleta/{unit_id}"));
        assert!(paths.contains_key("/api/v1/units/{unit_id}/queue"));
        assert!(paths.contains_key("/api/v1/units/{unit_id}/absences/{absence_id}"));
    }
}
