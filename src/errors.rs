use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::paymongo::ProcessorError;

/// Shown when a method token never reached the server.
pub const MISSING_METHOD_NOTICE: &str = "Your payment did not proceed due to an error. Rest assured that no payment was made. You may refresh this page and try again.";
/// Shown for transport failures talking to the processor.
pub const CONNECTION_ERROR_NOTICE: &str = "Connection error. Check logs.";
/// Shown whenever the payment cannot proceed and there is nothing more specific to say.
pub const GENERIC_PAYMENT_NOTICE: &str = "Something went wrong with the payment. Please try another payment method. If issue persist, contact support.";

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Simplified error structure for OpenAPI documentation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Not found: order 550e8400-e29b-41d4-a716-446655440000",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Internal Server Error")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Error,
    Success,
    Notice,
}

/// A message for the customer, rendered by the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn generic() -> Self {
        Self::error(GENERIC_PAYMENT_NOTICE)
    }
}

/// Failures of a single checkout step. Each maps to customer notices and is
/// never turned into a server error at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckoutError {
    #[error("Validation failed: missing payment method token")]
    MissingMethodToken,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error talking to the processor: {0}")]
    Transport(String),

    #[error("Processor rejected the request: {}", .0.join("; "))]
    ProcessorRejection(Vec<String>),

    #[error("Unsupported payment intent status: {0}")]
    UnsupportedStatus(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl CheckoutError {
    /// Customer-facing notices for this failure.
    pub fn notices(&self) -> Vec<Notice> {
        match self {
            CheckoutError::MissingMethodToken => vec![Notice::error(MISSING_METHOD_NOTICE)],
            CheckoutError::Transport(_) => vec![Notice::error(CONNECTION_ERROR_NOTICE)],
            CheckoutError::ProcessorRejection(details) if !details.is_empty() => {
                details.iter().map(Notice::error).collect()
            }
            CheckoutError::Validation(_)
            | CheckoutError::ProcessorRejection(_)
            | CheckoutError::UnsupportedStatus(_)
            | CheckoutError::InvariantViolation(_) => vec![Notice::generic()],
        }
    }

    /// Label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckoutError::MissingMethodToken | CheckoutError::Validation(_) => "validation",
            CheckoutError::Transport(_) => "transport",
            CheckoutError::ProcessorRejection(_) => "processor_rejection",
            CheckoutError::UnsupportedStatus(_) => "unsupported_status",
            CheckoutError::InvariantViolation(_) => "invariant_violation",
        }
    }
}

impl From<ProcessorError> for CheckoutError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Transport(msg) => CheckoutError::Transport(msg),
            ProcessorError::Rejected(details) => CheckoutError::ProcessorRejection(
                details.into_iter().map(|d| d.detail).collect(),
            ),
            ProcessorError::UnexpectedResponse { status, message } => CheckoutError::Transport(
                format!("unexpected response ({}): {}", status, message),
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Checkout(CheckoutError::MissingMethodToken | CheckoutError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Checkout(CheckoutError::Transport(_)) => StatusCode::BAD_GATEWAY,
            Self::Checkout(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Database errors are reduced to a generic message.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = self.response_message();

        let request_id = current_request_id();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: error_message,
            details: None,
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
