//! Token exchange handler

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::Value;

use crate::api::BridgeState;
use crate::codec;
use crate::error::AppError;
use crate::nello::NelloClient;

#[derive(Deserialize)]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: String,
}

/// POST /api/token - Generate an access token from client credentials
pub async fn request_token(
    State(state): State<BridgeState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<Value>, AppError> {
    if req.client_id.is_empty() || req.client_secret.is_empty() {
        return Err(AppError::BadRequest(
            "client_id and client_secret are required".to_string(),
        ));
    }

    match NelloClient::request_token(&state.auth_url, &req.client_id, &req.client_secret).await {
        Ok(token) => {
            tracing::debug!("Generated token using Client ID and Client Secret");
            let encoded = state
                .secret
                .as_deref()
                .map(|key| codec::encode(key, &token.access_token));
            Ok(Json(serde_json::json!({
                "ok": true,
                "token": token,
                "encoded_access_token": encoded,
            })))
        }
        Err(e) => {
            tracing::warn!("Failed generating token ({})!", e);
            Err(AppError::UpstreamError(e))
        }
    }
}
