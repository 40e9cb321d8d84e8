//! Wire envelope for every write outcome.
//!
//! Success and failure travel the same way: HTTP 200, `application/json`,
//! status in the body.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coordinator::Appended;
use crate::error::{ValidationError, WriteError};

pub const CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingData,
    InvalidJson,
    MissingFields,
    LockTimeout,
    InternalError,
}

impl ErrorCode {
    /// Client errors will fail the same way on every retry.
    pub fn is_client_error(self) -> bool {
        matches!(self, Self::MissingData | Self::InvalidJson | Self::MissingFields)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    Success {
        row: usize,
        #[serde(rename = "executionTime")]
        execution_time: f64,
    },
    Error {
        message: String,
        code: ErrorCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        required: Option<Vec<String>>,
    },
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success { .. } => None,
            Self::Error { code, .. } => Some(*code),
        }
    }

    fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code,
            required: None,
        }
    }
}

/// Outcomes of one trip down the write path.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Appended(Appended),
    Rejected(ValidationError),
    Failed(WriteError),
}

impl From<Appended> for Outcome {
    fn from(appended: Appended) -> Self {
        Self::Appended(appended)
    }
}

impl From<ValidationError> for Outcome {
    fn from(e: ValidationError) -> Self {
        Self::Rejected(e)
    }
}

impl From<WriteError> for Outcome {
    fn from(e: WriteError) -> Self {
        Self::Failed(e)
    }
}

pub fn build(outcome: &Outcome) -> Envelope {
    match outcome {
        Outcome::Appended(appended) => Envelope::Success {
            row: appended.row,
            execution_time: appended.elapsed.as_secs_f64(),
        },
        Outcome::Rejected(ValidationError::MissingBody) => {
            Envelope::error(ErrorCode::MissingData, "No data received")
        }
        Outcome::Rejected(ValidationError::MalformedPayload(detail)) => {
            Envelope::error(ErrorCode::InvalidJson, format!("Invalid JSON: {detail}"))
        }
        Outcome::Rejected(ValidationError::MissingFields(missing)) => Envelope::Error {
            message: format!("Missing required fields: {}", missing.join(", ")),
            code: ErrorCode::MissingFields,
            required: Some(missing.iter().map(|f| f.to_string()).collect()),
        },
        Outcome::Failed(WriteError::LockTimeout { .. }) => Envelope::error(
            ErrorCode::LockTimeout,
            "Server is busy, could not acquire the write lock. Please retry.",
        ),
        Outcome::Failed(WriteError::Internal(detail)) => {
            // Detail is already logged by the coordinator; callers get the generic text.
            debug!(detail = %detail, "masking internal error");
            Envelope::error(ErrorCode::InternalError, "Internal server error")
        }
    }
}
