use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub error_type: String,
    pub param: Option<String>,
    /// `true` when the request was rejected before anything reached an upstream provider.
    pub local_error: bool,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: None,
            local_error: true,
        }
    }

    /// An error reported by the upstream provider and passed through to the caller.
    pub fn upstream(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            local_error: false,
            ..Self::new(status, code, message).with_type("upstream_error")
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    param: Option<String>,
    code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: self.message,
                error_type: self.error_type,
                param: self.param,
                code: self.code,
            },
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures while assembling or reading a [`crate::context::SessionContext`].
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid relay format: {0}")]
    InvalidFormat(String),
    #[error("request for format {format} is a {found}, expected a {expected}")]
    TypeMismatch {
        format: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("context for format {format} carries no {expected} state")]
    ExtensionMismatch {
        format: &'static str,
        expected: &'static str,
    },
    #[error("task request not found in context")]
    TaskRequestMissing,
}

impl ContextError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid_format",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::ExtensionMismatch { .. } => "extension_mismatch",
            Self::TaskRequestMissing => "task_request_missing",
        }
    }
}

impl From<ContextError> for AppError {
    fn from(err: ContextError) -> Self {
        let status = match err {
            ContextError::InvalidFormat(_) | ContextError::TypeMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            ContextError::ExtensionMismatch { .. } | ContextError::TaskRequestMissing => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_errors_map_to_local_client_errors() {
        let err: AppError = ContextError::InvalidFormat("bogus".to_string()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "invalid_format");
        assert!(err.local_error);

        let err: AppError = ContextError::TaskRequestMissing.into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn upstream_errors_are_not_local() {
        let err = AppError::upstream(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "slow down");
        assert!(!err.local_error);
        assert_eq!(err.error_type, "upstream_error");
    }
}
