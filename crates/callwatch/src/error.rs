//! Error types for callwatch.
//!
//! This module defines the crate-level error type. Lookup outcomes have their
//! own error type in [`crate::directory::LookupError`] because the debouncer
//! absorbs them rather than propagating them.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for callwatch operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Directory Errors ===
    /// Failed to load a student directory fixture.
    #[error("failed to load directory fixture {path}: {message}")]
    DirectoryLoad {
        /// Path to the fixture file.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// The HTTP client for the student directory could not be built.
    #[error("failed to create directory client: {0}")]
    DirectoryClient(String),

    // === Presentation Errors ===
    /// The notification presenter rejected a request.
    #[error("notification presenter failed: {0}")]
    Presentation(String),

    // === Service Errors ===
    /// The call monitor is no longer accepting commands.
    #[error("call monitor has shut down")]
    MonitorClosed,

    /// The call monitor's command queue is full.
    #[error("call monitor queue is full")]
    QueueFull,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line of an event stream could not be parsed.
    #[error("invalid event on line {line}: {message}")]
    EventParse {
        /// One-based line number.
        line: usize,
        /// Description of the parse failure.
        message: String,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for callwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new presentation error.
    #[must_use]
    pub fn presentation(message: impl Into<String>) -> Self {
        Self::Presentation(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Create a directory fixture load error.
    #[must_use]
    pub fn directory_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DirectoryLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error means the monitor is gone.
    #[must_use]
    pub fn is_monitor_closed(&self) -> bool {
        matches!(self, Self::MonitorClosed)
    }
}
