//! Error handling module for oudedetai
//!
//! Provides the crate-wide error type. Variants follow the recovery policy
//! of the caller: validation errors are re-asked by the configuration
//! resolver, resource and headless errors end the running operation.

use thiserror::Error;

/// Main error type for oudedetai
#[derive(Error, Debug)]
pub enum DedetaiError {
    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, persistence)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A supplied value was rejected by a setter
    #[error("Validation error: {0}")]
    Validation(String),

    /// Disk space, permissions and other environment resources
    #[error("Resource error: {0}")]
    Resource(String),

    /// External command failed to spawn or returned failure
    #[error("Command failed: {0}")]
    Command(String),

    /// A question needed answering but no interactive front-end is attached
    #[error("No front-end available to answer: {0}")]
    Headless(String),

    /// User or signal cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// There was nothing to act on
    #[error("Nothing to do: {0}")]
    NothingToDo(String),

    /// An install step could not complete
    #[error("Install error: {0}")]
    Install(String),

    /// Managed process control errors
    #[error("Process error: {0}")]
    Process(String),

    /// Download and release lookup errors
    #[error("Network error: {0}")]
    Network(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for oudedetai operations
pub type Result<T> = std::result::Result<T, DedetaiError>;

impl DedetaiError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn headless(msg: impl Into<String>) -> Self {
        Self::Headless(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn nothing_to_do(msg: impl Into<String>) -> Self {
        Self::NothingToDo(msg.into())
    }

    pub fn install(msg: impl Into<String>) -> Self {
        Self::Install(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }

    /// Whether the failure can be recovered by asking the user again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
