//! Error taxonomy shared by every public operation.
//!
//! Argument, state, mapping and validation errors are raised before any
//! statement reaches the driver. [`DataError::Execution`] is produced only by
//! the SQL executor's safe-execution primitives and always carries the
//! statement text that failed.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why an in-flight command was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Token,
    /// The command ran longer than its timeout.
    Deadline(Duration),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Token => write!(f, "cancelled by caller"),
            CancelReason::Deadline(d) => write!(f, "timed out after {:?}", d),
        }
    }
}

#[derive(Debug, Error)]
pub enum DataError {
    /// Unsupported selector shape, missing update selectors and similar
    /// caller mistakes.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// The operation needs metadata or a state the target does not have.
    #[error("invalid state: {0}")]
    State(String),

    /// A referenced field does not resolve against the entity descriptor.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Required fields are missing on insert.
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Driver-level or result-mapping failure.
    #[error("error executing '{sql}': {source}")]
    Execution {
        sql: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("'{sql}' {reason}")]
    Cancelled { sql: String, reason: CancelReason },
}

impl DataError {
    /// Argument, state, mapping and validation failures are caused by the
    /// caller and should surface as client faults.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            DataError::Argument(_)
                | DataError::State(_)
                | DataError::Mapping(_)
                | DataError::Validation(_)
        )
    }

    /// Statement text attached to execution and cancellation errors.
    pub fn sql(&self) -> Option<&str> {
        match self {
            DataError::Execution { sql, .. } | DataError::Cancelled { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataError>;
