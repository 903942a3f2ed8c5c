//! Error responses for the ingestion routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Body was not valid JSON or lacked required fields. Answered with 500,
    /// which is what the browser script treats as "report dropped".
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The pipeline side of the channel is gone (controller shutting down).
    #[error("pipeline unavailable")]
    Unavailable,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match self {
            IngestError::MalformedPayload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            IngestError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_payload_is_500() {
        let response = IngestError::MalformedPayload("expected value".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["error"].as_str().unwrap().contains("expected value"));
    }

    #[tokio::test]
    async fn unavailable_is_503() {
        let response = IngestError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
