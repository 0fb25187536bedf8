//! Error types for the liftplan_core library.

use crate::MaxType;
use serde::Serialize;
use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
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

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Coarse classification used by the outer boundary to pick a status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    InvalidState,
    Unprocessable,
    Internal,
}

/// Core error type for liftplan_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A referenced record does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// One or more inputs failed validation
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    /// The operation collides with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The state machine does not allow this action right now
    #[error("Cannot {action} while {current_state}")]
    InvalidState {
        action: &'static str,
        current_state: String,
    },

    /// The user has no current max for a lift a prescription needs
    #[error("No current {max_type} for user {user_id} on lift {lift_id}")]
    MaxNotFound {
        user_id: String,
        lift_id: String,
        max_type: MaxType,
    },

    /// Request is well-formed but cannot be processed for this user
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    /// Unexpected failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a single-field validation failure
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation(vec![FieldError::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::MaxNotFound { .. } | Error::Unprocessable(_) => ErrorKind::Unprocessable,
            Error::Internal(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Csv(_)
            | Error::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show outside the core; internal details are withheld
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_not_found_is_unprocessable() {
        let err = Error::MaxNotFound {
            user_id: "u1".into(),
            lift_id: "squat".into(),
            max_type: MaxType::TrainingMax,
        };
        assert_eq!(err.kind(), ErrorKind::Unprocessable);
        assert!(err.to_string().contains("squat"));
    }

    #[test]
    fn test_validation_joins_fields() {
        let err = Error::Validation(vec![
            FieldError::new("week", "must be >= 1"),
            FieldError::new("day", "not scheduled"),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: week: must be >= 1; day: not scheduled"
        );
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = Error::Io(io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.public_message(), "internal error");
    }
}
