//! Route handlers for the HTTP control API.
//!
//! Every handler drives the same [`ReplicationNode`] the shell uses, so an
//! edit made over HTTP is replicated to peers like any local edit.

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crdt::{ClockSnapshot, SiteId};
use crate::error::NodeError;
use crate::replication::ReplicationNode;

#[derive(Serialize, Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: SiteId,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LogResponse {
    pub entries: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PeersResponse {
    pub peers: Vec<SiteId>,
}

#[derive(Deserialize, Debug)]
pub struct LogQuery {
    #[serde(default = "default_log_tail")]
    pub n: usize,
}

fn default_log_tail() -> usize {
    10
}

#[derive(Serialize, Deserialize, Debug)]
pub struct InsertRequest {
    pub position: usize,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct InsertResponse {
    pub inserted: usize,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteRequest {
    pub position: usize,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct DeleteResponse {
    pub deleted: char,
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// Rejected edits become `400` with the error message.
impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match self {
            NodeError::EmptyText | NodeError::InvalidPosition { .. } => StatusCode::BAD_REQUEST,
            NodeError::Shutdown => StatusCode::SERVICE_UNAVAILABLE,
            NodeError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn health(State(node): State<ReplicationNode>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: node.node_id().to_string(),
    })
}

pub async fn text(State(node): State<ReplicationNode>) -> Json<TextResponse> {
    Json(TextResponse {
        text: node.visible_text(),
    })
}

pub async fn log(
    State(node): State<ReplicationNode>,
    Query(query): Query<LogQuery>,
) -> Json<LogResponse> {
    Json(LogResponse {
        entries: node.operation_log(query.n),
    })
}

/// The vector clock as a JSON object of counters.
pub async fn clock(State(node): State<ReplicationNode>) -> Json<serde_json::Value> {
    let snapshot: ClockSnapshot = node.clock_snapshot();
    let counters: serde_json::Map<String, serde_json::Value> = snapshot
        .iter()
        .map(|(site, counter)| (site.clone(), serde_json::Value::from(counter)))
        .collect();
    Json(serde_json::Value::Object(counters))
}

pub async fn peers(State(node): State<ReplicationNode>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: node.peers(),
    })
}

pub async fn insert(
    State(node): State<ReplicationNode>,
    Json(request): Json<InsertRequest>,
) -> Result<Json<InsertResponse>, NodeError> {
    let inserted = node.local_insert(request.position, &request.text)?;
    Ok(Json(InsertResponse {
        inserted,
        text: node.visible_text(),
    }))
}

pub async fn delete(
    State(node): State<ReplicationNode>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, NodeError> {
    let character = node.local_delete(request.position)?;
    Ok(Json(DeleteResponse {
        deleted: character.value(),
        text: node.visible_text(),
    }))
}

/// Creates the control API router bound to `node`.
pub fn create_router(node: ReplicationNode) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/text", get(text))
        .route("/log", get(log))
        .route("/clock", get(clock))
        .route("/peers", get(peers))
        .route("/insert", post(insert))
        .route("/delete", post(delete))
        .with_state(node)
}

/// Serves the control API on `addr` until the node shuts down.
pub async fn serve(node: ReplicationNode, addr: &str) -> Result<SocketAddr, NodeError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("[Node {}] HTTP API on http://{}", node.node_id(), local_addr);

    let shutdown = node.shutdown_signal();
    let app = create_router(node);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!("HTTP API stopped: {}", e);
        }
    });
    Ok(local_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::CausalGapPolicy;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (ReplicationNode, Router) {
        let node = ReplicationNode::new("node1", ["node2"], CausalGapPolicy::Buffer);
        (node.clone(), create_router(node))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app();
        let response = app.oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["node_id"], "node1");
    }

    #[tokio::test]
    async fn test_insert_then_delete() {
        let (node, app) = app();

        let response = app
            .clone()
            .oneshot(post_json("/insert", r#"{"position":0,"text":"abc"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["inserted"], 3);
        assert_eq!(json["text"], "abc");

        let response = app
            .clone()
            .oneshot(post_json("/delete", r#"{"position":1}"#))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["deleted"], "b");
        assert_eq!(json["text"], "ac");
        assert_eq!(node.visible_text(), "ac");

        let response = app.oneshot(get_req("/clock")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["node1"], 4);
        assert_eq!(json["node2"], 0);
    }

    #[tokio::test]
    async fn test_rejected_edit_is_bad_request() {
        let (node, app) = app();

        let response = app
            .clone()
            .oneshot(post_json("/delete", r#"{"position":5}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("Invalid position 5"));

        let response = app
            .oneshot(post_json("/insert", r#"{"position":0,"text":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(node.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_log_tail_and_peers() {
        let (node, app) = app();
        node.local_insert(0, "hello").unwrap();

        let response = app.clone().oneshot(get_req("/log?n=2")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["entries"].as_array().unwrap().len(), 2);

        let response = app.clone().oneshot(get_req("/text")).await.unwrap();
        assert_eq!(body_json(response).await["text"], "hello");

        let response = app.oneshot(get_req("/peers")).await.unwrap();
        assert_eq!(body_json(response).await["peers"], serde_json::json!([]));
    }
}
