/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame segment is not valid base64.
    #[error("invalid base64 in frame: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A frame decoded to bytes that are not valid JSON, or a message could
    /// not be serialized.
    #[error("invalid JSON in frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The buffered frame exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
