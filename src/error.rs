//! Error types for omnirouter
//!
//! Provides structured error handling across all runtime components.

use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Error loading or unloading a native module
    #[error("Module error: {message}")]
    Module {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Error copying a module into or out of the mirror directory
    #[error("Staging error for {path:?}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the filesystem watch primitive
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Error in HTTP server operations
    #[error("Server error: {message}")]
    Server {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Create a module error
    pub fn module(message: impl Into<String>) -> Self {
        Self::Module {
            message: message.into(),
            source: None,
        }
    }

    /// Create a module error with source
    pub fn module_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Module {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a staging error
    pub fn stage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Stage {
            path: path.into(),
            source,
        }
    }

    /// Create a server error with source
    pub fn server_with_source(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Server {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// HTTP response error returned by the dispatcher
#[derive(Debug)]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": {
                "code": self.status,
                "message": self.message
            }
        })
    }
}
