use serde::Serialize;
use thiserror::Error;
use tracing::error;

use shared_models::error::AppError;

/// One failing field of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
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

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Malformed time, date or slot arithmetic input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("invalid time '{0}', expected HH:mm")]
    InvalidTime(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("slot duration must be greater than zero")]
    ZeroSlotDuration,

    #[error("minutes value {0} is outside a single day")]
    MinutesOutOfRange(u32),
}

#[derive(Debug, Error)]
pub enum AvailabilityError {
    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Detail is for server logs only; never shown to callers.
    #[error("Database operation failed")]
    Database(String),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),
}

impl AvailabilityError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AvailabilityError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        AvailabilityError::NotFound(format!("Availability {} not found", id))
    }

    pub fn database(err: impl std::fmt::Display) -> Self {
        AvailabilityError::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AvailabilityError {
    fn from(err: anyhow::Error) -> Self {
        AvailabilityError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for AvailabilityError {
    fn from(err: serde_json::Error) -> Self {
        AvailabilityError::Database(format!("Failed to parse availability: {}", err))
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::Validation(fields) => AppError::ValidationError {
                message: "Validation failed".to_string(),
                details: fields.iter().map(ToString::to_string).collect(),
            },
            AvailabilityError::Conversion(e) => AppError::ValidationError {
                message: "Validation failed".to_string(),
                details: vec![e.to_string()],
            },
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::NotFound(msg) => AppError::NotFound(msg),
            AvailabilityError::Database(detail) => {
                error!("Availability storage failure: {}", detail);
                AppError::Database("A database error occurred".to_string())
            }
        }
    }
}
