use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Metadata key for the skew angle (degrees) reported by the detection script.
pub const SKEW_ANGLE_KEY: &str = "ocr:skew-angle";
/// Metadata key for diagnostics from a failed skew detection.
pub const SKEW_ERROR_KEY: &str = "ocr:skew-error";
/// Metadata key for diagnostics from a failed ImageMagick normalization.
pub const NORMALIZE_ERROR_KEY: &str = "ocr:normalize-error";
/// Metadata key for a non-zero tesseract exit status.
pub const ENGINE_EXIT_KEY: &str = "ocr:engine-exit-status";
pub const CONTENT_TYPE_KEY: &str = "Content-Type";
pub const IMAGE_WIDTH_KEY: &str = "image:width";
pub const IMAGE_HEIGHT_KEY: &str = "image:height";

/// Receives string diagnostics produced while a job runs.
pub trait MetadataSink: Send {
    fn set(&mut self, key: &str, value: String);
}

/// Ordered key/value properties collected for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl MetadataSink for Metadata {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

impl MetadataSink for HashMap<String, String> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// Why a job finished without running the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    EngineUnavailable { engine: String },
    SizeOutOfRange { size: u64, min: u64, max: u64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EngineUnavailable { engine } => write!(f, "OCR engine unavailable at {engine}"),
            Self::SizeOutOfRange { size, min, max } => {
                write!(f, "image size {size} bytes outside configured range {min} - {max}")
            }
        }
    }
}

/// Successful end states of a job. Failures surface as `OcrflowError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OcrOutcome {
    /// The result file was found and its content delivered to the sink.
    Extracted,
    /// The engine ran but wrote no result file.
    NoOutput,
    Skipped(SkipReason),
}

impl OcrOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, OcrOutcome::Skipped(_))
    }
}
