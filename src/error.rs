//! Error handling for the tracemap crate
//!
//! This module defines the crate-wide error type and a Result alias.
//! Volume header decoding has its own error enum ([`FormatError`]) which
//! converts into [`TransformError`] at the module boundary.

use thiserror::Error;

use crate::volume::header::FormatError;

/// Main error type for transform operations
#[derive(Error, Debug)]
pub enum TransformError {
    /// Malformed volume container (bad magic, missing field, axis mismatch)
    #[error("Volume format error: {0}")]
    Format(#[from] FormatError),

    /// A required input record or file could not be found
    #[error("Input not found: {0}")]
    InputMissing(String),

    /// A transform is already in flight for the tracing id
    #[error("Transform already running for tracing {0}")]
    AlreadyRunning(String),

    /// Errors reported by the storage collaborator
    #[error("Storage error: {0}")]
    Storage(String),

    /// Misuse of the sampling contract (wrong index arity, released handle)
    #[error("Sample error: {0}")]
    Sample(String),

    /// Errors related to configuration loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TransformError>,
    },
}

impl TransformError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TransformError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error declines a run at admission rather than failing it
    /// mid-flight. Declined runs map to exit code 1, everything else to 2.
    pub fn is_declined(&self) -> bool {
        match self {
            TransformError::InputMissing(_) | TransformError::AlreadyRunning(_) => true,
            TransformError::WithContext { source, .. } => source.is_declined(),
            _ => false,
        }
    }
}

/// Result type alias for transform operations
pub type Result<T> = std::result::Result<T, TransformError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
