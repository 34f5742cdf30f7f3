//! Error types for lattix.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LattixError {
    // Configuration errors (fatal at session construction)
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Model bundle errors (fatal at session construction)
    #[error("Model file not found at {path}")]
    ModelFileNotFound { path: String },

    #[error("Failed to load model artifact {path}: {message}")]
    ModelLoad { path: String, message: String },

    #[error(
        "Model dimension mismatch: feature pipeline produces {pipeline_dim}, acoustic model expects {model_dim}"
    )]
    ModelDimMismatch {
        pipeline_dim: usize,
        model_dim: usize,
    },

    // Per-call errors (session remains usable)
    #[error("Unsupported sample format: {bits} bits per sample (only 8 and 16 are supported)")]
    UnsupportedFormat { bits: u32 },

    #[error("Invalid state for {operation}: {message}")]
    InvalidState { operation: String, message: String },

    #[error("Precondition failed for {operation}: {message}")]
    Precondition { operation: String, message: String },

    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    #[error("Unknown speaker: {key}")]
    UnknownSpeaker { key: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model artifact error: {0}")]
    Json(#[from] serde_json::Error),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, LattixError>;
