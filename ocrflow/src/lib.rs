//! Text extraction from images through the tesseract CLI, with optional
//! ImageMagick cleanup beforehand.

pub mod config;
pub mod error;
pub mod models;
pub mod ocr;
pub mod processing;

pub use config::{OcrConfig, OutputFormat};
pub use error::{OcrflowError, Result};
pub use models::{ContentSink, Metadata, MetadataSink, OcrOutcome, SkipReason};
pub use ocr::OcrRuntime;
pub use processing::{OcrJob, OcrPipeline};
