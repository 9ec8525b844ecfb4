use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Token failed verification. Deliberately opaque: callers never learn
    /// whether the signature, purpose or expiry was at fault.
    #[error("invalid token")]
    InvalidToken,

    #[error("missing or invalid session")]
    Unauthorized,

    #[error("not an admin for this tenant")]
    Forbidden,

    /// Signing secret, email transport or tenant config is absent. Surfaced
    /// as 503 rather than silently degrading to "not whitelisted".
    #[error("service not configured: {0}")]
    NotConfigured(String),

    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Optimistic-concurrency write lost its race after exhausting retries.
    #[error("concurrent update conflict")]
    Conflict,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or expired token".to_string(),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthorized",
                "missing or invalid session".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                "not authorized for this tenant".to_string(),
            ),
            AppError::NotConfigured(what) => {
                tracing::error!("not configured: {}", what);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable_error",
                    "not_configured",
                    "service temporarily unavailable".to_string(),
                )
            }
            AppError::StoreUnavailable(e) => {
                tracing::error!("object store unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable_error",
                    "store_unavailable",
                    "service temporarily unavailable".to_string(),
                )
            }
            AppError::RateLimited { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limit_error",
                "rate_limit_exceeded",
                "too many sign-in requests, try again later".to_string(),
            ),
            AppError::Conflict => (
                StatusCode::CONFLICT,
                "conflict_error",
                "write_conflict",
                "the whitelist changed concurrently, retry the action".to_string(),
            ),
            AppError::InvalidRequest(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
                reason.clone(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Tell rate-limited clients when the window reopens
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(val) = axum::http::HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert("retry-after", val);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_carries_retry_after() {
        let resp = AppError::RateLimited {
            retry_after_secs: 120,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "120");
    }

    #[test]
    fn store_failures_are_503_not_403() {
        let resp = AppError::StoreUnavailable("timeout".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
