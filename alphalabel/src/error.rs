use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single item inside a batch. Recorded, never escalated.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("no foreground pixels detected")]
    EmptyMask,

    #[error("background removal failed: {0}")]
    Transform(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl ItemError {
    /// Stable name of the failure kind, used in summaries and metadata
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Decode(_) => "decode",
            ItemError::EmptyMask => "empty-mask",
            ItemError::Transform(_) => "transform",
            ItemError::Io(_) => "io",
        }
    }
}

impl From<image::ImageError> for ItemError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => ItemError::Io(io),
            other => ItemError::Decode(other.to_string()),
        }
    }
}

/// Fatal misconfiguration detected before any worker starts
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("source directory does not exist: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("class folder does not exist: {} (use --permissive to continue without it)", .0.display())]
    MissingClass(PathBuf),

    #[error("no class folders found under {}", .0.display())]
    NoClasses(PathBuf),

    #[error("validation ratio must be in [0.0, 1.0), got {0}")]
    InvalidRatio(f64),

    #[error("learned matting requires an endpoint (--matting-url or ALPHALABEL_MATTING_URL)")]
    MissingMattingEndpoint,

    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("invalid class list: {0}")]
    InvalidClasses(String),

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_error_kinds() {
        assert_eq!(ItemError::Decode("bad".into()).kind(), "decode");
        assert_eq!(ItemError::EmptyMask.kind(), "empty-mask");
        assert_eq!(ItemError::Transform("timeout".into()).kind(), "transform");
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(ItemError::from(io).kind(), "io");
    }

    #[test]
    fn test_image_error_conversion() {
        let err = image::load_from_memory(b"definitely not an image").unwrap_err();
        assert_eq!(ItemError::from(err).kind(), "decode");
    }

    #[test]
    fn test_configuration_error_messages() {
        let err = ConfigurationError::MissingClass(PathBuf::from("/data/healthy"));
        assert!(err.to_string().contains("/data/healthy"));
        assert!(err.to_string().contains("--permissive"));
    }
}
