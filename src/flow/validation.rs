//! Validation results as data.

use std::fmt;

use axum::http::StatusCode;

/// Outcome of any validator run by the flow.
pub type ValidationResult<T> = Result<T, ValidationFailure>;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    /// The validator rejected the input; details are for the server side.
    Invalid(DataValidationError),
    /// A client-visible failure with an explicit status and body.
    Protocol(ProtocolError),
}

impl ValidationFailure {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(DataValidationError::new(message))
    }

    pub fn protocol(status_code: StatusCode, body: Option<String>) -> Self {
        Self::Protocol(ProtocolError { status_code, body })
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationFailure::Invalid(e) => write!(f, "validation error: {}", e),
            ValidationFailure::Protocol(e) => write!(f, "protocol error: {}", e.status_code),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataValidationError {
    pub error_info: serde_json::Value,
    pub message: String,
}

impl DataValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error_info: serde_json::Value::Null,
            message: message.into(),
        }
    }

    pub fn with_info(mut self, error_info: serde_json::Value) -> Self {
        self.error_info = error_info;
        self
    }
}

impl fmt::Display for DataValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolError {
    pub status_code: StatusCode,
    pub body: Option<String>,
}
