//! Custom error types for loopguard.
//!
//! Only configuration loading and explicit history management can fail.
//! The detection and intervention paths never surface errors to the
//! orchestrator: persistence faults are logged and swallowed there.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for loopguard operations
#[derive(Error, Debug)]
pub enum LoopGuardError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    // =========================================================================
    // History Errors
    // =========================================================================
    /// Action history could not be read or written
    #[error("Action history error at {path}: {message}")]
    History { path: PathBuf, message: String },

    /// Failed to acquire the history file lock
    #[error("Failed to lock action history {path}: {message}")]
    HistoryLock { path: PathBuf, message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LoopGuardError {
    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a history error
    pub fn history(path: PathBuf, message: impl Into<String>) -> Self {
        Self::History {
            path,
            message: message.into(),
        }
    }

    /// Check if a history reader can retry on the next poll
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::History { .. } | Self::HistoryLock { .. } | Self::Io(_) | Self::Json(_)
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            Self::History { .. } | Self::HistoryLock { .. } => 3,
            _ => 1,
        }
    }
}

/// Type alias for loopguard results
pub type Result<T> = std::result::Result<T, LoopGuardError>;
