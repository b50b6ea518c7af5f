//! Common error types for Pulse
//!
//! The pipeline persists most of its state as TEXT columns (UUIDs,
//! timestamps, JSON artifacts), so a dedicated pair of encode/decode
//! variants covers the round trip between domain types and storage.

use thiserror::Error;

/// Common result type for Pulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Pulse services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A domain value could not be serialized for storage
    #[error("Encode error: {0}")]
    Encode(String),

    /// A stored value could not be decoded back into its domain type
    /// (corrupt UUID/timestamp text, unknown status string, bad artifact JSON)
    #[error("Decode error: {0}")]
    Decode(String),
}
