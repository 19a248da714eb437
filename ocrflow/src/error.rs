use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OcrflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {} seconds", timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },

    #[error("OCR job interrupted while running {0}")]
    Interrupted(String),

    #[error("hOCR parse error: {0}")]
    Markup(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl OcrflowError {
    /// Cancellation must escape best-effort stages, which absorb every other error.
    pub fn is_interruption(&self) -> bool {
        matches!(self, OcrflowError::Interrupted(_))
    }
}

pub type Result<T> = std::result::Result<T, OcrflowError>;
