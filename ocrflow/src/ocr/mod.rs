//! External tool orchestration for OCR.
//!
//! # Architecture
//!
//! Everything here shells out; nothing links against tesseract or ImageMagick:
//! - `ToolAvailabilityCache` remembers whether a binary exists at a path
//! - `ProcessInvoker` runs one command with drained pipes, a timeout and cancellation
//! - `ImagePreprocessor` deskews and normalizes a working copy (best effort)
//! - `TesseractRunner` builds and runs the tesseract command line
//!
//! `OcrRuntime` bundles the process-wide pieces (the availability cache and the
//! timing counters). Pass one around as `Arc<OcrRuntime>`, or use
//! `OcrRuntime::shared()`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let runtime = OcrRuntime::shared();
//! let runner = TesseractRunner::new(runtime.invoker(), runtime.stats());
//! let result = runner.run(&image, &prefix, &config, None, &cancel).await?;
//! ```

mod preprocessing;
mod process;
mod provider;
mod stats;
#[cfg(all(test, unix))]
pub(crate) mod testutil;
mod tools;

use std::sync::{Arc, OnceLock};

pub use preprocessing::{ImagePreprocessor, NormalizeOutcome, PreprocessReport, SkewOutcome};
pub use process::{ProcessInvoker, ProcessOutput, ProcessRequest};
pub use provider::{result_path, TesseractRunner};
pub use stats::{Phase, TimingSnapshot, TimingStats};
pub use tools::{
    resolve_tool, CommandProbe, ToolAvailabilityCache, ToolProbe, IMAGEMAGICK_PROG,
    TESSERACT_PROG,
};

static SHARED: OnceLock<Arc<OcrRuntime>> = OnceLock::new();

/// State shared by every OCR job in the process.
#[derive(Debug)]
pub struct OcrRuntime {
    tools: ToolAvailabilityCache,
    stats: Arc<TimingStats>,
}

impl OcrRuntime {
    pub fn new(probe: Arc<dyn ToolProbe>) -> Self {
        Self {
            tools: ToolAvailabilityCache::new(probe),
            stats: Arc::new(TimingStats::new()),
        }
    }

    /// Lazily created runtime using [`CommandProbe`].
    pub fn shared() -> Arc<OcrRuntime> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(OcrRuntime::default())))
    }

    pub fn tools(&self) -> &ToolAvailabilityCache {
        &self.tools
    }

    pub fn stats(&self) -> Arc<TimingStats> {
        Arc::clone(&self.stats)
    }

    pub fn invoker(&self) -> ProcessInvoker {
        ProcessInvoker::new(self.stats())
    }
}

impl Default for OcrRuntime {
    fn default() -> Self {
        Self::new(Arc::new(CommandProbe))
    }
}
