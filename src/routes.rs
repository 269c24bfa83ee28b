use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{self, AppState};
use crate::openapi::{serve_openapi_json, serve_swagger_ui};
use crate::webhook_handler;

/// Versioned API routes, without middleware.
///
/// The binary wraps these in the body-limit and rate-limit layers before handing them to
/// [`build_app`]; tests use them bare.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Lead-arrival trigger
        .route(
            "/api/v1/webhooks/roleta/:unit_id",
            post(webhook_handler::trigger_rotation),
        )
        // Registry
        .route("/api/v1/units", get(handlers::list_units))
        .route("/api/v1/units/:unit_id", get(handlers::get_unit))
        .route(
            "/api/v1/units/:unit_id/agents",
            get(handlers::list_unit_agents),
        )
        // Queue management
        .route(
            "/api/v1/units/:unit_id/queue",
            get(handlers::get_queue_view).put(handlers::set_queue),
        )
        .route("/api/v1/units/:unit_id/active", put(handlers::set_active))
        // Assignment log
        .route(
            "/api/v1/units/:unit_id/history",
            get(handlers::list_history).delete(handlers::clear_history),
        )
        // Absences
        .route(
            "/api/v1/units/:unit_id/absences",
            get(handlers::list_absences).post(handlers::create_absence),
        )
        .route(
            "/api/v1/units/:unit_id/absences/:absence_id",
            put(handlers::update_absence).delete(handlers::delete_absence),
        )
}

/// Final application: health and docs routes plus `api`, with tracing and CORS.
///
/// Health stays outside `api` so platform health checks bypass rate limiting.
pub fn build_app(state: Arc<AppState>, api: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/docs", get(serve_swagger_ui))
        .route("/api-docs/openapi.json", get(serve_openapi_json))
        .merge(api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
