//! Error types for Warden

use std::time::Duration;
use thiserror::Error;

/// Result type for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Warden error types
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Command failed with exit code {exit_code}: {command}")]
    CommandExecution { command: String, exit_code: i32 },

    #[error("Command did not exit within {timeout:?}: {command}")]
    CommandTimedOut { command: String, timeout: Duration },

    #[error("Controller already stopped")]
    AlreadyStopped,

    #[error("Invalid process state: {0}")]
    InvalidState(String),

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),
}

impl WardenError {
    /// Exit code carried by a failed bridged command, if any
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            WardenError::CommandExecution { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}
