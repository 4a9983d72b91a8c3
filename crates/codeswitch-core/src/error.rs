//! Error types for codeswitch-core

use crate::atomic_write::WriteStage;
use thiserror::Error;

/// Result type alias using codeswitch-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for CodeSwitch
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Atomic write failed; the destination file was left untouched
    #[error("Atomic write of {path} failed at {stage}: {source}")]
    AtomicWrite {
        stage: WriteStage,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Home directory could not be determined
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an atomic write error tagged with the failing stage
    pub fn atomic_write(
        stage: WriteStage,
        path: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        Self::AtomicWrite {
            stage,
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Stage at which an atomic write failed, if this is an atomic write error
    pub fn write_stage(&self) -> Option<WriteStage> {
        match self {
            Self::AtomicWrite { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
