//! Transient vs. fatal error classification
//!
//! The one place that decides whether a failed unit of work may be retried.

use std::fmt;

/// SQLSTATE reported by the store for serialization failures ("restart transaction").
pub const SERIALIZATION_FAILURE: &str = "40001";

/// Retry classification of a unit-of-work failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Contention; retry the same request unchanged
    Transient,
    /// Anything else; stop the task
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "TRANSIENT"),
            ErrorClass::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Classify an error by walking its cause chain for a store error carrying
/// [`SERIALIZATION_FAILURE`].
pub fn classify(error: &anyhow::Error) -> ErrorClass {
    let transient = error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(is_serialization_failure);

    if transient {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// SQLSTATE of the most specific store error in the chain, if any.
pub fn sql_state(error: &anyhow::Error) -> Option<String> {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .filter_map(|e| e.as_database_error())
        .filter_map(|db| db.code().map(|c| c.into_owned()))
        .last()
}

fn is_serialization_failure(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == SERIALIZATION_FAILURE)
}
