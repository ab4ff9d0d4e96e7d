/// Error taxonomy for the resource engine
///
/// Every variant maps to a machine-readable kind (see [`WeftError::kind`]) so
/// that the CLI and HTTP shells can report failures uniformly.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Machine-readable error kinds
pub mod kinds {
    pub const REGISTRATION_ERROR: &str = "registration_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const CYCLE_DETECTED: &str = "cycle_detected";
    pub const MISSING_DEPENDENCY: &str = "missing_dependency";
    pub const EXECUTION_ERROR: &str = "execution_error";
    pub const REQUEST_ERROR: &str = "request_error";
    pub const IO_ERROR: &str = "io_error";
    pub const SERIALIZATION_ERROR: &str = "serialization_error";
}

/// A problem found while describing or installing one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationError {
    pub path: PathBuf,
    pub message: String,
}

impl RegistrationError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

/// Structured payload attached to a failed run or streamed as the final chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.trim().is_empty() {
            self.detail = Some(detail);
        }
        self
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail.trim())?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum WeftError {
    #[error("Registration failed: {0}")]
    Registration(RegistrationError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource name '{name}' is ambiguous, claimed by: {}", ids.join(", "))]
    Conflict { name: String, ids: Vec<String> },

    #[error("Cyclic dependency detected: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("Resource '{resource}' requires '{missing}', which is not registered")]
    MissingDependency { resource: String, missing: String },

    #[error("Execution of '{resource}' failed: {payload}")]
    Execution {
        resource: String,
        payload: ErrorPayload,
    },

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WeftError {
    /// Machine-readable kind of this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Registration(_) => kinds::REGISTRATION_ERROR,
            Self::NotFound(_) => kinds::NOT_FOUND,
            Self::Conflict { .. } => kinds::CONFLICT,
            Self::CycleDetected { .. } => kinds::CYCLE_DETECTED,
            Self::MissingDependency { .. } => kinds::MISSING_DEPENDENCY,
            Self::Execution { payload, .. } => {
                if payload.kind == kinds::REQUEST_ERROR {
                    kinds::REQUEST_ERROR
                } else {
                    kinds::EXECUTION_ERROR
                }
            }
            Self::Request(_) => kinds::REQUEST_ERROR,
            Self::Io(_) => kinds::IO_ERROR,
            Self::Serialization(_) => kinds::SERIALIZATION_ERROR,
        }
    }

    /// Convert into the payload shape used by run records and HTTP responses
    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            Self::Execution { payload, .. } => payload.clone(),
            other => ErrorPayload::new(other.kind(), other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_full_path() {
        let err = WeftError::CycleDetected {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.kind(), "cycle_detected");
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
    }

    #[test]
    fn test_execution_payload_keeps_request_kind() {
        let err = WeftError::Execution {
            resource: "report".into(),
            payload: ErrorPayload::new(kinds::REQUEST_ERROR, "missing variable"),
        };
        assert_eq!(err.kind(), "request_error");
        assert_eq!(err.to_payload().message, "missing variable");
    }

    #[test]
    fn test_blank_detail_is_dropped() {
        let payload = ErrorPayload::new(kinds::EXECUTION_ERROR, "boom").with_detail("  \n");
        assert!(payload.detail.is_none());
    }
}
