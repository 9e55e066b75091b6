//! Service error taxonomy.
//!
//! Every failure raised while handling a request is one of the
//! [`ServiceError`] kinds below. All of them are absorbed at the dispatcher
//! boundary and converted into a protocol-correct response; none may
//! terminate a connection-handling task.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`ServiceError`].
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Classification of a recognized domain failure.
///
/// The category determines the transport status code for the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or otherwise incorrect request input.
    BadRequest,
    /// Request body exceeds the configured maximum.
    PayloadTooLarge,
    /// Resource not found.
    NotFound,
    /// Conflict (e.g. concurrent modification).
    Conflict,
    /// A delegated operation exceeded its time budget.
    Timeout,
    /// Downstream service failure.
    External,
    /// Internal server error.
    Internal,
}

impl ErrorCategory {
    /// Returns the transport status code for this category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::External => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Failure raised while dispatching a request.
///
/// # Example
///
/// ```rust
/// use canopy_core::ServiceError;
///
/// fn lookup(id: &str) -> Result<(), ServiceError> {
///     Err(ServiceError::not_found(format!("cluster {id} not found")))
/// }
/// ```
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The request is malformed or otherwise incorrect.
    #[error("{message}")]
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// The request body exceeds the configured maximum size.
    #[error("request body size ({actual} bytes) exceeds maximum allowed size ({limit} bytes)")]
    PayloadTooLarge {
        /// Observed body size in bytes.
        actual: usize,
        /// Configured maximum in bytes.
        limit: usize,
    },

    /// An HTTP-shaped failure raised by a controller.
    ///
    /// Carries its own status; the explanation and detail are localized by
    /// the error translator. Non-error statuses (redirects) are returned by
    /// controllers as finished responses instead, never as this variant.
    #[error("{explanation}")]
    Http {
        /// Transport status for the failure.
        status: StatusCode,
        /// Short human-readable explanation.
        explanation: String,
        /// Optional additional detail.
        detail: Option<String>,
    },

    /// A recognized internal failure raised by a controller.
    #[error("{message}")]
    Domain {
        /// Human-readable error message.
        message: String,
        /// Classification that determines the status code.
        category: ErrorCategory,
    },

    /// Anything uncategorized.
    #[error("{inner}")]
    Unexpected {
        /// The underlying error (not exposed to clients verbatim).
        inner: anyhow::Error,
    },
}

impl ServiceError {
    /// Creates a bad-request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates a payload-too-large error.
    #[must_use]
    pub const fn payload_too_large(actual: usize, limit: usize) -> Self {
        Self::PayloadTooLarge { actual, limit }
    }

    /// Creates an HTTP-shaped failure with the given status.
    #[must_use]
    pub fn http(status: StatusCode, explanation: impl Into<String>) -> Self {
        Self::Http {
            status,
            explanation: explanation.into(),
            detail: None,
        }
    }

    /// Creates a not-found domain failure.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::domain(message, ErrorCategory::NotFound)
    }

    /// Creates a conflict domain failure.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::domain(message, ErrorCategory::Conflict)
    }

    /// Creates a timeout domain failure.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::domain(message, ErrorCategory::Timeout)
    }

    /// Creates a domain failure with an explicit category.
    #[must_use]
    pub fn domain(message: impl Into<String>, category: ErrorCategory) -> Self {
        Self::Domain {
            message: message.into(),
            category,
        }
    }

    /// Creates an unexpected failure from any error value.
    pub fn unexpected(inner: impl Into<anyhow::Error>) -> Self {
        Self::Unexpected {
            inner: inner.into(),
        }
    }

    /// Returns the transport status code for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Http { status, .. } => *status,
            Self::Domain { category, .. } => category.default_status_code(),
            Self::Unexpected { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> String {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST".to_string(),
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE".to_string(),
            Self::Http { status, .. } => format!("HTTP_{}", status.as_u16()),
            Self::Domain { category, .. } => match category {
                ErrorCategory::BadRequest => "BAD_REQUEST",
                ErrorCategory::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
                ErrorCategory::NotFound => "NOT_FOUND",
                ErrorCategory::Conflict => "CONFLICT",
                ErrorCategory::Timeout => "TIMEOUT",
                ErrorCategory::External => "EXTERNAL_SERVICE_ERROR",
                ErrorCategory::Internal => "INTERNAL_ERROR",
            }
            .to_string(),
            Self::Unexpected { .. } => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Returns `true` for failures a client caused.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Builds the pre-built error body for this failure.
    ///
    /// Used both for regular error responses and as the fallback body when
    /// a successful result cannot be serialized.
    #[must_use]
    pub fn error_body(&self) -> serde_json::Value {
        self.error_body_with_message(&self.to_string())
    }

    /// Builds the error body with an explicit (possibly localized) message.
    #[must_use]
    pub fn error_body_with_message(&self, message: &str) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.error_code(),
            "message": message,
        });
        if let Self::Http {
            detail: Some(detail),
            ..
        } = self
        {
            error["detail"] = serde_json::Value::String(detail.clone());
        }
        serde_json::json!({ "error": error })
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(err.to_string())
    }
}
