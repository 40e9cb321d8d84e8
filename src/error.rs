//! Error types for the ingestion path, the store and the client.

use thiserror::Error;

/// Faults raised by a record store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sheet not found: {0}")]
    SheetNotFound(String),

    #[error("invalid sheet name: {0:?}")]
    InvalidSheetName(String),
}

/// Client errors detected before anything touches the store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("no data received")]
    MissingBody,

    #[error("invalid JSON: {0}")]
    MalformedPayload(String),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// Failures of the write coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("could not acquire the write lock within {timeout_ms} ms")]
    LockTimeout { timeout_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Source(#[from] ::config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered with HTTP {0}")]
    Status(u16),

    #[error("all {0} attempts failed")]
    Exhausted(u32),
}
