//! HTTP route handlers for the coordinator.

use axum::{
    Router,
    routing::{delete, get, post, put},
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rollcall_common::{ControlPlaneState, NodeStatus, RollcallError};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::roster::NodeView;
use crate::state::AppState;

mod health;
mod sync;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))

        // Admin endpoints
        .nest("/admin", admin_routes())

        .layer(TraceLayer::new_for_http())

        // Add shared state
        .with_state(state)
}

/// Admin routes (registry reset, roster, replication log)
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reset", post(reset_cluster))
        .route("/clusters/{name}", get(get_cluster))
        .route("/roster", get(list_roster))
        .route("/roster/{id}", get(get_node))
        .route("/roster/{id}/status", put(set_node_status))
        .route("/sync", get(sync::pending).post(sync::record))
        .route("/sync/{transaction_id}", get(sync::get_record))
        .route("/sync/seq/{seq}", delete(sync::delete_record))
}

/// A [`RollcallError`] rendered as `{"error": kind, "message": ...}`
pub struct ApiError(RollcallError);

impl From<RollcallError> for ApiError {
    fn from(err: RollcallError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "Admin request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.kind(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

// === Admin Handlers ===

#[derive(Deserialize)]
struct ResetRequest {
    name: String,
}

#[derive(Serialize)]
struct ResetResponse {
    status: &'static str,
    name: String,
}

async fn reset_cluster(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, ApiError> {
    if payload.name.is_empty() {
        return Err(RollcallError::InvalidInput("cluster name is empty".into()).into());
    }

    state.registry.reset(&payload.name).await?;

    Ok(Json(ResetResponse {
        status: "reset",
        name: payload.name,
    }))
}

async fn get_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ControlPlaneState>, ApiError> {
    Ok(Json(state.registry.state(&name).await?))
}

async fn list_roster(State(state): State<AppState>) -> Json<Vec<NodeView>> {
    Json(state.roster.list().await)
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeView>, ApiError> {
    Ok(Json(state.roster.get(&id).await?))
}

#[derive(Deserialize)]
struct SetStatus {
    status: NodeStatus,
}

async fn set_node_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SetStatus>,
) -> Result<Json<NodeView>, ApiError> {
    state.roster.set_status(&id, payload.status).await?;
    tracing::info!(node = %id, status = %payload.status, "Node status set");
    Ok(Json(state.roster.get(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::registry::Registry;
    use crate::roster::testing::*;
    use crate::rpc::RpcClient;
    use crate::store::MemoryIdentityStore;
    use crate::synclog::MemorySyncLog;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use rollcall_common::AssignRequest;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::assert_ok;
    use tower::ServiceExt;

    struct Harness {
        state: AppState,
        source: Arc<MemoryMembership>,
        sync: Arc<CountingSync>,
    }

    fn harness() -> Harness {
        let source = Arc::new(MemoryMembership::default());
        let (roster, sync) = counting_roster(source.clone(), Arc::new(FakeConnector::default()));
        let registry = Arc::new(Registry::new(
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(RpcClient::new(Duration::from_millis(200))),
        ));
        let state = AppState::new(
            AppConfig::default(),
            None,
            registry,
            roster,
            Arc::new(MemorySyncLog::new()),
        );
        Harness { state, source, sync }
    }

    async fn send(state: &AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn assign(name: &str, instance: &str) -> AssignRequest {
        AssignRequest {
            name: name.to_string(),
            max_nodes: 3,
            host: "10.0.0.1".to_string(),
            port: 7070,
            instance_id: instance.to_string(),
            service: "db".to_string(),
        }
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let h = harness();
        let (status, body) = send(&h.state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&h.state, Method::GET, "/ready", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"], 0);
        assert!(body.get("redis").is_none());
    }

    #[tokio::test]
    async fn test_reset_clears_cluster_state() {
        let h = harness();
        assert_ok!(h.state.registry.assign_or_reclaim(&assign("alpha", "i-1")).await);

        let (status, body) = send(&h.state, Method::GET, "/admin/clusters/alpha", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"]["1"]["instance_id"], "i-1");

        let (status, body) = send(
            &h.state,
            Method::POST,
            "/admin/reset",
            Some(json!({"name": "alpha"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "reset", "name": "alpha"}));

        let (status, body) = send(&h.state, Method::GET, "/admin/clusters/alpha", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        // Identities start over after a reset
        assert_eq!(
            h.state.registry.assign_or_reclaim(&assign("alpha", "i-2")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_reset_rejects_empty_name() {
        let h = harness();
        let (status, _) = send(&h.state, Method::POST, "/admin/reset", Some(json!({"name": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_roster_views_and_status() {
        let h = harness();
        h.source.upsert(row("b", 2, "10.0.0.2"));
        h.source.upsert(row("a", 1, "10.0.0.1"));
        assert_ok!(h.state.roster.bootstrap().await);
        settled(&h.state.roster, &h.sync, "a", 2).await;
        settled(&h.state.roster, &h.sync, "b", 2).await;

        let (status, body) = send(&h.state, Method::GET, "/admin/roster", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body.as_array().unwrap().iter().map(|n| n["id"].clone()).collect();
        assert_eq!(ids, vec![json!("a"), json!("b")]);

        let (status, body) = send(&h.state, Method::GET, "/admin/roster/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "active");
        assert_eq!(body["connected"], true);
        assert!(!body["url"].as_str().unwrap().contains("pw"));

        let (status, body) = send(
            &h.state,
            Method::PUT,
            "/admin/roster/a/status",
            Some(json!({"status": "working"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "working");

        // Working -> Sync skips Active
        let (status, body) = send(
            &h.state,
            Method::PUT,
            "/admin/roster/a/status",
            Some(json!({"status": "sync"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_transition");

        let (status, _) = send(&h.state, Method::GET, "/admin/roster/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_log_lifecycle() {
        let h = harness();
        let change = json!({
            "schema": "public",
            "table": "users",
            "action": "UPDATE",
            "origin_node": "n1",
            "transaction_id": "tx-1",
            "payload": {"id": "tx-1", "name": "ann", "age": 30}
        });

        let (status, body) = send(&h.state, Method::POST, "/admin/sync", Some(change)).await;
        assert_eq!(status, StatusCode::CREATED);
        let seq = body["seq"].as_i64().unwrap();

        let (status, body) = send(&h.state, Method::GET, "/admin/sync/tx-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "UPDATE");
        assert!(body["sql"].as_str().unwrap().contains("ON CONFLICT (ID)"));

        let (status, body) = send(&h.state, Method::GET, "/admin/sync?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(&h.state, Method::DELETE, &format!("/admin/sync/seq/{seq}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&h.state, Method::GET, "/admin/sync/tx-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_change_without_key_rejected() {
        let h = harness();
        let change = json!({
            "table": "users",
            "action": "DELETE",
            "origin_node": "n1",
            "transaction_id": "tx-2",
            "payload": {"name": "ann"}
        });
        let (status, body) = send(&h.state, Method::POST, "/admin/sync", Some(change)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn test_sync_change_with_crafted_field_name_rejected() {
        let h = harness();
        let change = json!({
            "table": "users",
            "action": "INSERT",
            "origin_node": "n1",
            "transaction_id": "tx-3",
            "payload": {"id": 1, "x) VALUES (1); DROP TABLE users; --": 3}
        });
        let (status, body) = send(&h.state, Method::POST, "/admin/sync", Some(change)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");

        let (status, _) = send(&h.state, Method::GET, "/admin/sync/tx-3", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
