//! Error types for picvoice.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage a timeout was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Description,
    Synthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Download => write!(f, "image download"),
            Stage::Description => write!(f, "image description"),
            Stage::Synthesis => write!(f, "speech synthesis"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PicvoiceError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Request boundary
    #[error("Bad request: {message}")]
    BadRequest { message: String },

    // Description stage (recovered with the fallback caption)
    #[error("Failed to download image from {url}: {message}")]
    Download { url: String, message: String },

    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    #[error("Image description failed: {message}")]
    Inference { message: String },

    // Synthesis stage (terminal)
    #[error("Speech synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("{stage} timed out after {}s", after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    // Artifact storage
    #[error("File system error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Resource exhausted: {message}")]
    ResourceExhausted { message: String },

    #[error("Artifact not found: {artifact}")]
    NotFound { artifact: String },

    #[error("Artifact {artifact} is owned by request {owner}, not {requested_by}")]
    OwnershipViolation {
        artifact: String,
        owner: String,
        requested_by: String,
    },

    #[error("Artifact {artifact} does not belong to the {area} area")]
    WrongArea { artifact: String, area: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl PicvoiceError {
    /// Errors the request handler answers with the spoken fallback caption.
    pub fn is_description_failure(&self) -> bool {
        match self {
            PicvoiceError::Download { .. }
            | PicvoiceError::Decode { .. }
            | PicvoiceError::Inference { .. } => true,
            PicvoiceError::Timeout { stage, .. } => {
                matches!(stage, Stage::Download | Stage::Description)
            }
            _ => false,
        }
    }

    /// Wrap an I/O error on an artifact path, keeping storage-full apart.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::StorageFull {
            PicvoiceError::ResourceExhausted {
                message: format!("no space left writing {}", path.display()),
            }
        } else {
            PicvoiceError::FileSystem { path, source }
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PicvoiceError>;
