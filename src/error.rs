//! Application error taxonomy.
//!
//! Every failure that reaches a handler is one of these kinds. Storage and
//! hashing causes ride along for logs but are never rendered to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{entity} with {field}={value} not found")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{entity} with {field}={value} already exists")]
    AlreadyExists {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{0}")]
    Forbidden(String),

    /// `message` is what the caller sees; `source` is for diagnostics only.
    #[error("{message}")]
    BadRequest {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            source: None,
        }
    }

    /// A bad request whose real cause must stay out of the response body.
    pub fn bad_request_hidden(cause: anyhow::Error, message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            source: Some(cause),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::BadRequest { .. } => ErrorCode::BadRequest,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists => StatusCode::CONFLICT,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text that is safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Stable machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    Forbidden,
    BadRequest,
    Internal,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            Self::Internal(cause) => error!(error = ?cause, "request failed"),
            Self::BadRequest {
                message,
                source: Some(cause),
            } => debug!(%message, cause = %cause, "bad request"),
            _ => {}
        }

        let body = ErrorBody {
            code: self.code(),
            message: self.public_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}
