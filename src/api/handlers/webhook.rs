//! Webhook listener handler

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::Value;

use crate::api::BridgeState;
use crate::error::AppError;
use crate::sync::EventFeed;

/// POST / and /webhook - Event pushed by nello
pub async fn receive_webhook(
    State(feed): State<Arc<EventFeed>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    record(&feed, &payload).await
}

/// POST /api/events - Feed an event by hand, same rules as the webhook
pub async fn post_event(
    State(state): State<BridgeState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, AppError> {
    record(&state.feed, &payload).await
}

async fn record(feed: &EventFeed, payload: &Value) -> Result<Json<Value>, AppError> {
    if !feed.on_webhook(payload).await {
        return Err(AppError::BadRequest(
            "Webhook payload requires action and data".to_string(),
        ));
    }

    Ok(Json(serde_json::json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{MemoryStateTree, StateTree};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    fn app() -> (Arc<MemoryStateTree>, axum::Router) {
        let tree = Arc::new(MemoryStateTree::new());
        let feed = Arc::new(EventFeed::new(tree.clone(), 30));
        (tree, crate::api::webhook_routes(feed))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_webhook_accepted() {
        let (tree, app) = app();
        let body = json!({"action": "swipe", "data": {"location_id": "loc", "timestamp": 1520000000}});

        let resp = app.oneshot(post("/webhook", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(tree.get_state("loc.events.feed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_webhook_rejected_without_action() {
        let (_tree, app) = app();
        let resp = app
            .oneshot(post("/", json!({"data": {"location_id": "loc"}})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
