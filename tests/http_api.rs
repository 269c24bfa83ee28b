use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use rust_roleta_api::handlers::AppState;
use rust_roleta_api::memory_store::{FailPoint, MemoryLeadQueueStore};
use rust_roleta_api::models::{Agent, Unit};
use rust_roleta_api::routes::{api_routes, build_app};

struct TestApp {
    store: Arc<MemoryLeadQueueStore>,
    unit: Unit,
    agents: Vec<Agent>,
}

impl TestApp {
    async fn new(names: &[&str]) -> Self {
        let store = Arc::new(MemoryLeadQueueStore::default());
        let unit = store.insert_unit("Jardins").await;
        let mut agents = Vec::new();
        for name in names {
            agents.push(store.insert_agent(unit.id, name).await);
        }
        Self {
            store,
            unit,
            agents,
        }
    }

    fn router(&self) -> Router {
        let state = Arc::new(AppState::new(self.store.clone()));
        build_app(state, api_routes())
    }

    async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn set_queue(&self, ids: &[Uuid]) -> (StatusCode, Value) {
        self.send(
            Method::PUT,
            &format!("/api/v1/units/{}/queue", self.unit.id),
            Some(json!({ "agent_ids": ids })),
        )
        .await
    }

    async fn trigger(&self, query: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            &format!("/api/v1/webhooks/roleta/{}{}", self.unit.id, query),
            None,
        )
        .await
    }
}

#[tokio::test]
async fn health_reports_service() {
    let app = TestApp::new(&[]).await;
    let (status, body) = app.send(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "rust-roleta-api");
}

#[tokio::test]
async fn trigger_assigns_and_rotates() {
    let app = TestApp::new(&["Ana", "Bruno", "Carla"]).await;
    let ids: Vec<Uuid> = app.agents.iter().map(|a| a.id).collect();
    let (status, _) = app.set_queue(&ids).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.trigger("?lead_id=lead-77").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "assigned");
    assert_eq!(body["agent"]["name"], "Ana");
    assert_eq!(body["agent"]["email"], "ana@imob.com.br");
    assert_eq!(body["previous_position"], 1);
    assert_eq!(body["unit"]["name"], "Jardins");
    assert_eq!(body["lead_id"], "lead-77");

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/units/{}/queue", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Bruno", "Carla", "Ana"]);

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/units/{}/history?limit=10", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["agent_name"], "Ana");
    assert_eq!(body["items"][0]["lead_id"], "lead-77");
}

#[tokio::test]
async fn trigger_errors_map_to_status_and_kind() {
    let app = TestApp::new(&["Ana"]).await;

    let (status, body) = app.trigger("").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "empty_queue");
    assert_eq!(body["retryable"], false);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/v1/webhooks/roleta/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    app.set_queue(&[app.agents[0].id]).await;
    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/v1/units/{}/active", app.unit.id),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);

    let (status, body) = app.trigger("").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "inactive");
}

#[tokio::test]
async fn storage_failure_is_retryable() {
    let app = TestApp::new(&["Ana"]).await;
    app.set_queue(&[app.agents[0].id]).await;
    app.store.inject_failure(FailPoint::AfterLogAppend).await;

    let (status, body) = app.trigger("").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "storage");
    assert_eq!(body["retryable"], true);
    assert_eq!(body["error"], "Storage temporarily unavailable");
}

#[tokio::test]
async fn busy_unit_returns_concurrency_timeout() {
    let store = Arc::new(MemoryLeadQueueStore::new(std::time::Duration::from_millis(20)));
    let unit = store.insert_unit("Moema").await;
    let agent = store.insert_agent(unit.id, "Ana").await;
    let app = TestApp {
        store,
        unit,
        agents: vec![agent],
    };
    app.set_queue(&[app.agents[0].id]).await;

    let _held = app.store.locks().acquire(app.unit.id).await.unwrap();
    let (status, body) = app.trigger("").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "concurrency_timeout");
    assert_eq!(body["retryable"], true);
}

#[tokio::test]
async fn invalid_queue_payloads_are_rejected() {
    let app = TestApp::new(&["Ana"]).await;
    let a = app.agents[0].id;

    let (status, body) = app.set_queue(&[a, a]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/api/v1/units/{}/queue", app.unit.id),
            Some(json!({ "agents": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn absence_lifecycle_over_http() {
    let app = TestApp::new(&["Ana", "Bruno"]).await;
    let uri = format!("/api/v1/units/{}/absences", app.unit.id);

    let (status, created) = app
        .send(
            Method::POST,
            &uri,
            Some(json!({
                "agent_id": app.agents[0].id,
                "starts_at": "2025-01-01T00:00:00Z",
                "ends_at": "2025-01-08T00:00:00Z",
                "reason": "Férias"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let absence_id = created["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Some(json!({
                "agent_id": app.agents[1].id,
                "starts_at": "2025-01-08T00:00:00Z",
                "ends_at": "2025-01-01T00:00:00Z"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("{}/{}", uri, absence_id),
            Some(json!({
                "agent_id": app.agents[0].id,
                "starts_at": "2025-01-01T00:00:00Z",
                "ends_at": "2025-01-10T00:00:00Z",
                "reason": "Férias estendidas"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reason"], "Férias estendidas");

    let (status, body) = app
        .send(Method::GET, &format!("{}?agent_id={}", uri, app.agents[0].id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = app
        .send(Method::DELETE, &format!("{}/{}", uri, absence_id), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app
        .send(Method::DELETE, &format!("{}/{}", uri, absence_id), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn history_can_be_cleared() {
    let app = TestApp::new(&["Ana", "Bruno"]).await;
    let ids: Vec<Uuid> = app.agents.iter().map(|a| a.id).collect();
    app.set_queue(&ids).await;
    app.trigger("").await;
    app.trigger("").await;

    let uri = format!("/api/v1/units/{}/history", app.unit.id);
    let (status, body) = app.send(Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);

    let (_, body) = app.send(Method::GET, &uri, None).await;
    assert_eq!(body["total"], 0);
    assert_eq!(body["limit"], 50);
}

#[tokio::test]
async fn units_and_members_are_listed() {
    let app = TestApp::new(&["Bruno", "Ana"]).await;

    let (status, body) = app.send(Method::GET, "/api/v1/units", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Jardins");

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/units/{}/agents", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "Ana");
    assert_eq!(body[0]["absent"], false);

    let (status, body) = app
        .send(Method::GET, &format!("/api/v1/units/{}", Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new(&[]).await;
    let (status, body) = app.send(Method::GET, "/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/webhooks/roleta/{unit_id}"].is_object());
}

#[tokio::test]
async fn malformed_path_and_query_return_json_errors() {
    let app = TestApp::new(&["Ana"]).await;

    let (status, body) = app
        .send(Method::POST, "/api/v1/webhooks/roleta/not-a-uuid", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
    assert_eq!(body["retryable"], false);

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/units/{}/history?limit=abc", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/api/v1/units/{}/absences?from=yesterday", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .send(
            Method::DELETE,
            &format!("/api/v1/units/{}/absences/42", app.unit.id),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");

    let (status, body) = app
        .send(Method::GET, "/api/v1/units/nope/queue", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}
