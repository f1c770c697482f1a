use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Path is outside the serving root")]
    PathEscape,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DriveError {
    pub(crate) fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        DriveError::Bind {
            addr: addr.into(),
            source,
        }
    }

    pub(crate) fn bind_addr(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::bind(addr.to_string(), source)
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DriveError::PathEscape => "PATH_ESCAPE",
            DriveError::NotFound(_) => "NOT_FOUND",
            DriveError::BadRequest(_) => "BAD_REQUEST",
            DriveError::Io(_) => "IO_ERROR",
            DriveError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            DriveError::Bind { .. } => "BIND_ERROR",
            DriveError::InvalidState(_) => "INVALID_STATE",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DriveError::PathEscape | DriveError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DriveError::NotFound(_) => StatusCode::NOT_FOUND,
            DriveError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DriveError::InvalidState(_) => StatusCode::CONFLICT,
            DriveError::Io(_) | DriveError::Bind { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Missing files surface as `NotFound` rather than a generic IO failure.
pub(crate) fn io_or_not_found(err: std::io::Error, what: &str) -> DriveError {
    if err.kind() == std::io::ErrorKind::NotFound {
        DriveError::NotFound(what.to_string())
    } else {
        DriveError::Io(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for DriveError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
        };

        (self.status(), Json(body)).into_response()
    }
}
