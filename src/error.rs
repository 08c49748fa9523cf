use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::path::PathBuf;

/// Errors produced by the canvas engine and its surfaces.
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("coordinate ({x}, {y}) is outside the {width}x{height} canvas")]
    OutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    },

    #[error("rate limit exceeded for client {client}")]
    RateLimited { client: String },

    #[error("failed to persist snapshot to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to load base image {}: {source}", path.display())]
    Startup {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CanvasError>;

impl CanvasError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, err: impl Into<image::ImageError>) -> Self {
        CanvasError::Persistence {
            path: path.into(),
            source: err.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            CanvasError::OutOfBounds { .. } => StatusCode::FORBIDDEN,
            CanvasError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CanvasError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CanvasError::Persistence { .. }
            | CanvasError::Startup { .. }
            | CanvasError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_canvas_error(err: &CanvasError) -> Self {
        let code = err.status_code().as_u16();
        match err {
            CanvasError::OutOfBounds { .. } => Self::new("out_of_bounds", &err.to_string(), code),
            CanvasError::RateLimited { .. } => {
                Self::new("rate_limit_exceeded", "Pixel placement rate limit exceeded", code)
            }
            CanvasError::InvalidRequest(msg) => Self::new("bad_request", msg, code),
            CanvasError::Persistence { .. } => Self::new("persistence_error", &err.to_string(), code),
            CanvasError::Startup { .. } => Self::new("startup_error", &err.to_string(), code),
            CanvasError::Internal(msg) => Self::new("internal_error", msg, code),
        }
    }
}

impl IntoResponse for CanvasError {
    fn into_response(self) -> Response {
        match &self {
            CanvasError::OutOfBounds { .. } | CanvasError::InvalidRequest(_) => {
                tracing::debug!(error = %self, "Rejected request");
            }
            CanvasError::RateLimited { client } => {
                tracing::debug!(client = %client, "Rate limited pixel placement");
            }
            _ => tracing::error!(error = %self, "Request failed"),
        }

        let body = ErrorResponse::from_canvas_error(&self);
        let mut resp = (self.status_code(), Json(body)).into_response();
        if matches!(self, CanvasError::RateLimited { .. }) {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let oob = CanvasError::OutOfBounds {
            x: 10,
            y: -1,
            width: 4,
            height: 4,
        };
        assert_eq!(oob.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            CanvasError::RateLimited { client: "1.2.3.4".to_string() }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            CanvasError::InvalidRequest("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_rate_limited_response_has_retry_after() {
        let resp = CanvasError::RateLimited { client: "a".to_string() }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn test_error_response_body() {
        let err = CanvasError::OutOfBounds {
            x: 5,
            y: 0,
            width: 4,
            height: 4,
        };
        let body = ErrorResponse::from_canvas_error(&err);
        assert_eq!(body.error, "out_of_bounds");
        assert_eq!(body.code, 403);
        assert!(body.message.contains("(5, 0)"));
    }
}
