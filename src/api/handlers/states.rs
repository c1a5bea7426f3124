//! State tree handlers
//!
//! Read access to everything the bridge mirrored, and user writes that trigger
//! the subscribed control nodes.

use axum::{
    extract::{Path, State as AxumState},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::api::BridgeState;
use crate::error::AppError;
use crate::state::State;

#[derive(Deserialize)]
pub struct WriteStateRequest {
    #[serde(default)]
    pub val: Value,
}

/// GET /api/states - All states keyed by id
pub async fn list_states(
    AxumState(state): AxumState<BridgeState>,
) -> Result<Json<Value>, AppError> {
    let ids = state
        .tree
        .objects_under("")
        .await
        .map_err(AppError::InternalError)?;

    let mut states = serde_json::Map::new();
    for id in ids {
        if let Some(s) = state.tree.get_state(&id).await.map_err(AppError::InternalError)? {
            states.insert(id, serde_json::to_value(s).unwrap_or(Value::Null));
        }
    }

    Ok(Json(serde_json::json!({
        "ok": true,
        "total": states.len(),
        "states": states,
    })))
}

/// GET /api/states/:id - One state with its object
pub async fn get_state(
    AxumState(state): AxumState<BridgeState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let object = state
        .tree
        .get_object(&id)
        .await
        .map_err(AppError::InternalError)?
        .ok_or_else(|| AppError::NotFound(format!("State {} not found", id)))?;
    let current = state
        .tree
        .get_state(&id)
        .await
        .map_err(AppError::InternalError)?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "object": object,
        "state": current,
    })))
}

/// PUT /api/states/:id - Write a value as a user (not acknowledged)
pub async fn write_state(
    AxumState(state): AxumState<BridgeState>,
    Path(id): Path<String>,
    Json(req): Json<WriteStateRequest>,
) -> Result<Json<Value>, AppError> {
    let object = state
        .tree
        .get_object(&id)
        .await
        .map_err(AppError::InternalError)?;
    if object.is_none() {
        return Err(AppError::NotFound(format!("State {} not found", id)));
    }

    state
        .tree
        .set_state(&id, State::new(req.val, false))
        .await
        .map_err(AppError::InternalError)?;

    tracing::debug!("State {} written via API", id);
    Ok(Json(serde_json::json!({ "ok": true, "id": id })))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::api::{routes, BridgeState};
    use crate::state::{MemoryStateTree, NodeSpec, StateMirror, StateTree};
    use crate::sync::EventFeed;

    fn app(tree: Arc<MemoryStateTree>) -> axum::Router {
        let state = BridgeState {
            feed: Arc::new(EventFeed::new(tree.clone(), 30)),
            tree,
            auth_url: "http://127.0.0.1:9/oauth/token/".into(),
            secret: None,
        };
        routes().with_state(state)
    }

    fn put(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_unknown_state() {
        let tree = Arc::new(MemoryStateTree::new());
        let resp = app(tree)
            .oneshot(put("/api/states/loc._openDoor", json!({"val": true})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_write_notifies_subscribers_unacknowledged() {
        let tree = Arc::new(MemoryStateTree::new());
        StateMirror::new(tree.clone())
            .set(&NodeSpec::new("loc._openDoor"), false)
            .await;
        tree.subscribe("loc._openDoor").await;
        let mut changes = tree.changes();

        let resp = app(tree.clone())
            .oneshot(put("/api/states/loc._openDoor", json!({"val": true})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let change = changes.try_recv().unwrap();
        let state = change.state.unwrap();
        assert_eq!(state.val, json!(true));
        assert!(!state.ack);
    }
}
