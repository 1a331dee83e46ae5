//! Error types for the wkhtmltox bindings

use thiserror::Error;

/// Result type alias for binding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the native library
#[derive(Error, Debug)]
pub enum Error {
    /// A content object was constructed without usable content
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Invalid configuration (cache directory, output path, settings file)
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The native library could not be staged or bound
    #[error("Failed to load native library: {0}")]
    LoadError(String),

    /// The native library refused to initialize
    #[error("Native library initialization failed: {0}")]
    InitializationError(String),

    /// The native library handed back an unusable handle
    #[error("Native call failed: {0}")]
    NativeError(String),

    /// The native conversion reported failure; carries the collected log
    #[error("Conversion returned with failure. Log:\n{0}")]
    ConversionFailed(String),

    /// A worker task failed for a reason other than a conversion error
    #[error("Execution failed: {0}")]
    ExecutionError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Rebuild an equivalent error for handing a memoized failure out again.
    pub(crate) fn replay(&self) -> Error {
        match self {
            Error::InvalidObject(m) => Error::InvalidObject(m.clone()),
            Error::ConfigError(m) => Error::ConfigError(m.clone()),
            Error::LoadError(m) => Error::LoadError(m.clone()),
            Error::InitializationError(m) => Error::InitializationError(m.clone()),
            Error::NativeError(m) => Error::NativeError(m.clone()),
            Error::ConversionFailed(m) => Error::ConversionFailed(m.clone()),
            Error::ExecutionError(m) => Error::ExecutionError(m.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}
