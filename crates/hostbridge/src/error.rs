//! Error types shared by every hostbridge component
//!
//! Each failure carries a machine-readable [`ErrorCode`] so the dispatcher can
//! turn it into the standard response envelope without guessing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Machine-readable error codes returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    InvalidInput,
    NotFound,
    LimitExceeded,
    Conflict,
    WriteConfirmationRequired,
    PolicyBlocked,
    PairingFailed,
    NotSupported,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::WriteConfirmationRequired => "WRITE_CONFIRMATION_REQUIRED",
            ErrorCode::PolicyBlocked => "POLICY_BLOCKED",
            ErrorCode::PairingFailed => "PAIRING_FAILED",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status used when the error leaves the daemon
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::Unauthorized | ErrorCode::PairingFailed => 401,
            ErrorCode::Forbidden | ErrorCode::PolicyBlocked => 403,
            ErrorCode::InvalidInput => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::LimitExceeded => 413,
            ErrorCode::Conflict => 409,
            ErrorCode::WriteConfirmationRequired => 428,
            ErrorCode::NotSupported => 501,
            ErrorCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single rejected policy field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Outcome of a batch commit that had to be undone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub rolled_back: bool,
    pub failed_at_index: usize,
    pub rollback_errors: Vec<String>,
    pub reason: String,
}

/// Every failure a hostbridge component can raise
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid policy: {} field error(s)", .0.len())]
    InvalidPolicy(Vec<FieldError>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Batch write failed at index {}: {}", .0.failed_at_index, .0.reason)]
    BatchRolledBack(BatchFailure),

    #[error("Confirmation required: {message}")]
    ConfirmationRequired {
        message: String,
        confirmation_id: Option<String>,
    },

    #[error("Blocked by policy: {0}")]
    PolicyBlocked(String),

    #[error("Pairing failed: code is invalid or expired")]
    PairingFailed,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::Unauthorized(_) => ErrorCode::Unauthorized,
            BridgeError::Forbidden(_) => ErrorCode::Forbidden,
            BridgeError::InvalidInput(_) | BridgeError::InvalidPolicy(_) => ErrorCode::InvalidInput,
            BridgeError::NotFound(_) => ErrorCode::NotFound,
            BridgeError::LimitExceeded(_) => ErrorCode::LimitExceeded,
            BridgeError::Conflict(_) | BridgeError::BatchRolledBack(_) => ErrorCode::Conflict,
            BridgeError::ConfirmationRequired { .. } => ErrorCode::WriteConfirmationRequired,
            BridgeError::PolicyBlocked(_) => ErrorCode::PolicyBlocked,
            BridgeError::PairingFailed => ErrorCode::PairingFailed,
            BridgeError::NotSupported(_) => ErrorCode::NotSupported,
            BridgeError::Io(_) | BridgeError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Structured details that accompany the message, if any
    pub fn data(&self) -> Option<Value> {
        match self {
            BridgeError::InvalidPolicy(errors) => Some(json!({ "fieldErrors": errors })),
            BridgeError::BatchRolledBack(failure) => serde_json::to_value(failure).ok(),
            BridgeError::ConfirmationRequired {
                confirmation_id: Some(id),
                ..
            } => Some(json!({ "confirmationId": id })),
            _ => None,
        }
    }

    pub fn confirmation_required(message: impl Into<String>) -> Self {
        BridgeError::ConfirmationRequired {
            message: message.into(),
            confirmation_id: None,
        }
    }

    /// Map a filesystem error on `path` to the closest error code
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => BridgeError::NotFound(format!("{}", path.display())),
            ErrorKind::AlreadyExists => {
                BridgeError::Conflict(format!("{} already exists", path.display()))
            }
            ErrorKind::PermissionDenied => {
                BridgeError::Forbidden(format!("permission denied: {}", path.display()))
            }
            _ => BridgeError::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
