//! JSON error responses for the HTTP API.
//!
//! Every failure is rendered as `{"error": {"code", "message", "details"}}`,
//! `details` only present for field validation failures.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::engine::AlertError;

/// Field name to the messages raised against it
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    NotFound,
    ValidationError,
    UnknownAlertType,
    NotConfigured,
    DatabaseError,
    /// Admin API, SMTP relay or Slack failed
    ExternalServiceError,
    GatewayTimeout,
}

impl ErrorCode {
    pub fn status(self) -> StatusCode {
        use ErrorCode::*;
        match self {
            BadRequest | ValidationError | UnknownAlertType | NotConfigured => {
                StatusCode::BAD_REQUEST
            }
            Unauthorized => StatusCode::UNAUTHORIZED,
            NotFound => StatusCode::NOT_FOUND,
            DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ExternalServiceError => StatusCode::BAD_GATEWAY,
            GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    error: &'a ApiError,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<FieldErrors>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// 400 carrying every field error. A single error becomes the message.
    pub fn validation(details: FieldErrors) -> Self {
        let mut messages = details.values().flatten();
        let message = match (messages.next(), details.len()) {
            (Some(only), 1) => only.clone(),
            _ => format!("{} settings fields are invalid", details.len()),
        };

        Self {
            code: ErrorCode::ValidationError,
            message,
            details: Some(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(Envelope { error: &self })).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::RowNotFound = err {
            return Self::new(ErrorCode::NotFound, "Shop not found");
        }
        tracing::error!(error = %err, "Database error while handling request");
        Self::new(ErrorCode::DatabaseError, "A database error occurred")
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        let code = match err {
            AlertError::Database(e) => return e.into(),
            AlertError::UnknownKind(_) => ErrorCode::UnknownAlertType,
            AlertError::Configuration(_) => ErrorCode::NotConfigured,
            AlertError::Timeout { .. } => ErrorCode::GatewayTimeout,
            AlertError::Fetch(_) | AlertError::Delivery(_) => ErrorCode::ExternalServiceError,
        };
        Self::new(code, err.to_string())
    }
}

/// Accumulates settings field errors so one response reports all of them
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: FieldErrors,
}

impl ValidationErrorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(self.errors))
        }
    }
}
