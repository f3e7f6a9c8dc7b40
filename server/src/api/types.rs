//! Shared API types
//!
//! Error responses and query parameter helpers used across endpoints.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::utils::time::parse_iso_millis;

/// Parse an optional timestamp parameter (RFC 3339) into epoch milliseconds
pub fn parse_timestamp_param(name: &str, s: Option<&str>) -> Result<Option<i64>, ApiError> {
    match s {
        Some(ts) => parse_iso_millis(ts).map(Some).ok_or_else(|| {
            ApiError::bad_request(
                "INVALID_TIMESTAMP",
                format!("Invalid {} timestamp: {}. Use RFC 3339 format.", name, ts),
            )
        }),
        None => Ok(None),
    }
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}

/// Fallback for unknown routes
pub async fn handle_404() -> ApiError {
    ApiError::not_found("NOT_FOUND", "No such endpoint")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_param() {
        assert_eq!(parse_timestamp_param("from", None).unwrap(), None);
        assert_eq!(
            parse_timestamp_param("from", Some("2024-01-01T00:00:00Z")).unwrap(),
            Some(1_704_067_200_000)
        );
        assert_eq!(
            parse_timestamp_param("from", Some("2024-01-01T02:00:00+02:00")).unwrap(),
            Some(1_704_067_200_000)
        );
        assert!(matches!(
            parse_timestamp_param("to", Some("yesterday")),
            Err(ApiError::BadRequest { .. })
        ));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::bad_request("X", "bad").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::not_found("X", "gone").into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::internal("boom").into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
