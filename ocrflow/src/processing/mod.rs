mod output;
mod pipeline;

pub use output::{is_wrapper_element, OutputExtractor, BLOCK_CLASS, BLOCK_ELEMENT};
pub use pipeline::{OcrJob, OcrPipeline, SUPPORTED_TYPES};
