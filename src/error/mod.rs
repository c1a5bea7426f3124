//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::UpstreamError(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

/// Rejections for the payload written to a `createTimeWindow` control node
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeWindowRequestError {
    #[error("Parsing error for time window data: {0}")]
    Parse(String),

    #[error("No name for the time window has been provided!")]
    MissingName,

    #[error("Wrong ical data for timewindow provided! Missing BEGIN:VCALENDAR, END:VCALENDAR, BEGIN:VEVENT or END:VEVENT.")]
    InvalidCalendar,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let resp = AppError::NotFound("state x".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::UpstreamError("nello down".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_request_error_messages() {
        assert_eq!(
            TimeWindowRequestError::Parse("expected value".into()).to_string(),
            "Parsing error for time window data: expected value"
        );
        assert!(TimeWindowRequestError::InvalidCalendar
            .to_string()
            .starts_with("Wrong ical data"));
    }
}
