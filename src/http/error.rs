use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::engine::EngineError;
use crate::store::StoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Auth(AuthError),
    /// Malformed request body or parameters.
    BadRequest(String),
    NotFound(String),
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Engine(e) => write!(f, "{e}"),
            ApiError::Auth(e) => write!(f, "{e}"),
            ApiError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            ApiError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Engine(err.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_) | EngineError::LimitExceeded(_) => {
                    (StatusCode::BAD_REQUEST, "ValidationError", None)
                }
                EngineError::PastDate { .. } => (StatusCode::BAD_REQUEST, "PastDateError", None),
                EngineError::Conflict(reason) => (
                    StatusCode::BAD_REQUEST,
                    "ConflictError",
                    Some(reason.as_str().to_string()),
                ),
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFoundError", None),
                EngineError::UnknownUser(_) => (StatusCode::UNAUTHORIZED, "AuthError", None),
                EngineError::Transient { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "TransientError", None)
                }
                EngineError::WalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", None),
            },
            ApiError::Auth(AuthError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", None)
            }
            ApiError::Auth(_) => (StatusCode::UNAUTHORIZED, "AuthError", None),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "ValidationError", None),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFoundError", None),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, reason) = self.parts();
        let message = match &self {
            // Storage detail stays in the log.
            ApiError::Engine(EngineError::WalError(e)) => {
                tracing::error!("request failed on storage: {e}");
                "internal storage error".to_string()
            }
            ApiError::Auth(AuthError::Internal(e)) => {
                tracing::error!("request failed in auth backend: {e}");
                "internal authentication error".to_string()
            }
            ApiError::Engine(EngineError::UnknownUser(_)) => "user no longer exists".to_string(),
            other => other.to_string(),
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
            reason,
        });
        let mut response = (status, body).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
