use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nanoid::nanoid;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::OcrConfig;
use crate::error::Result;
use crate::models::{
    ContentSink, MetadataSink, OcrOutcome, SkipReason, CONTENT_TYPE_KEY, IMAGE_HEIGHT_KEY,
    IMAGE_WIDTH_KEY,
};
use crate::ocr::{
    resolve_tool, ImagePreprocessor, OcrRuntime, TesseractRunner, IMAGEMAGICK_PROG,
    TESSERACT_PROG,
};

use super::output::OutputExtractor;

/// Media types tesseract is fed by this pipeline.
pub const SUPPORTED_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/tiff",
    "image/bmp",
    "image/gif",
    "image/jp2",
    "image/jpx",
    "image/x-portable-pixmap",
];

const TEMP_PREFIX: &str = "ocrflow-";
const WORKING_STEM: &str = "ocr-input";
const OUTPUT_STEM: &str = "ocr-output";

/// One OCR request.
///
/// Sinks are borrowed for the duration of the job. Everything the job writes
/// to disk lives in a temporary directory that is removed when the job ends,
/// however it ends.
pub struct OcrJob<'a> {
    input: PathBuf,
    config: &'a OcrConfig,
    metadata: Option<&'a mut dyn MetadataSink>,
    content: Option<&'a mut dyn ContentSink>,
    temp_parent: Option<PathBuf>,
    cancel: CancellationToken,
}

impl<'a> OcrJob<'a> {
    pub fn new(input: impl Into<PathBuf>, config: &'a OcrConfig) -> Self {
        Self {
            input: input.into(),
            config,
            metadata: None,
            content: None,
            temp_parent: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_metadata(mut self, sink: &'a mut dyn MetadataSink) -> Self {
        self.metadata = Some(sink);
        self
    }

    pub fn with_content(mut self, sink: &'a mut dyn ContentSink) -> Self {
        self.content = Some(sink);
        self
    }

    /// Create job directories under `parent` instead of the system temp dir.
    pub fn with_temp_dir(mut self, parent: impl Into<PathBuf>) -> Self {
        self.temp_parent = Some(parent.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn input(&self) -> &Path {
        &self.input
    }
}

/// Size check, preprocessing, tesseract, extraction.
pub struct OcrPipeline {
    runtime: Arc<OcrRuntime>,
    preprocessor: ImagePreprocessor,
    runner: TesseractRunner,
}

impl OcrPipeline {
    pub fn new(runtime: Arc<OcrRuntime>) -> Self {
        let preprocessor = ImagePreprocessor::new(runtime.invoker());
        let runner = TesseractRunner::new(runtime.invoker(), runtime.stats());
        Self {
            runtime,
            preprocessor,
            runner,
        }
    }

    pub fn runtime(&self) -> &Arc<OcrRuntime> {
        &self.runtime
    }

    /// Media types this pipeline accepts, or none when tesseract is missing so
    /// that a host can route images elsewhere.
    pub async fn supported_types(&self, config: &OcrConfig) -> &'static [&'static str] {
        let engine = resolve_tool(&config.tesseract_path, TESSERACT_PROG);
        if self.runtime.tools().check_available(&engine).await {
            SUPPORTED_TYPES
        } else {
            &[]
        }
    }

    /// Run one job against the file at `job.input()`.
    pub async fn run(&self, job: OcrJob<'_>) -> Result<OcrOutcome> {
        let job_id = nanoid!(10);
        let span = info_span!("ocr_job", job_id = %job_id);
        self.run_job(job).instrument(span).await
    }

    /// Spool `bytes` to a temporary file and run the job on it.
    ///
    /// The job's input path only names the spooled file; its extension is kept
    /// so the tools can recognize the format.
    pub async fn run_bytes(&self, bytes: &[u8], mut job: OcrJob<'_>) -> Result<OcrOutcome> {
        let spool = job_temp_dir(job.temp_parent.as_deref())?;
        let name = job
            .input
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("input"));
        let path = spool.path().join(name);
        tokio::fs::write(&path, bytes).await?;

        job.input = path;
        let outcome = self.run(job).await;
        drop(spool);
        outcome
    }

    /// Encode `image` as PNG and run the job on it.
    pub async fn run_image(
        &self,
        image: &image::DynamicImage,
        mut job: OcrJob<'_>,
    ) -> Result<OcrOutcome> {
        let mut encoded = Vec::new();
        image.write_to(&mut Cursor::new(&mut encoded), image::ImageFormat::Png)?;
        job.input = PathBuf::from("image.png");
        self.run_bytes(&encoded, job).await
    }

    async fn run_job(&self, job: OcrJob<'_>) -> Result<OcrOutcome> {
        let OcrJob {
            input,
            config,
            mut metadata,
            content,
            temp_parent,
            cancel,
        } = job;

        config.validate()?;

        let engine = resolve_tool(&config.tesseract_path, TESSERACT_PROG);
        if !self.runtime.tools().check_available(&engine).await {
            debug!(engine = %engine, "tesseract unavailable, skipping OCR");
            return Ok(OcrOutcome::Skipped(SkipReason::EngineUnavailable { engine }));
        }

        let size = tokio::fs::metadata(&input).await?.len();
        if size < config.min_file_size || size > config.max_file_size {
            let reason = SkipReason::SizeOutOfRange {
                size,
                min: config.min_file_size,
                max: config.max_file_size,
            };
            warn!(input = %input.display(), "Skipping OCR: {}", reason);
            return Ok(OcrOutcome::Skipped(reason));
        }

        let temp_dir = job_temp_dir(temp_parent.as_deref())?;
        record_image_metadata(&input, reborrow(&mut metadata)).await;

        let ocr_input = if config.enable_preprocessing {
            let working = temp_dir.path().join(working_name(&input));
            tokio::fs::copy(&input, &working).await?;

            let convert = resolve_tool(&config.imagemagick_path, IMAGEMAGICK_PROG);
            if self.runtime.tools().check_available(&convert).await {
                let report = self
                    .preprocessor
                    .preprocess(&working, config, reborrow(&mut metadata), &cancel)
                    .await?;
                debug!(?report, "Preprocessing finished");
            } else {
                error!(
                    "ImageMagick is not installed at {}. Preprocessing skipped, OCR runs on the unmodified image",
                    convert
                );
            }
            working
        } else {
            input.clone()
        };

        let prefix = temp_dir.path().join(OUTPUT_STEM);
        let result = self
            .runner
            .run(&ocr_input, &prefix, config, reborrow(&mut metadata), &cancel)
            .await?;

        if !tokio::fs::try_exists(&result).await? {
            info!(result = %result.display(), "tesseract produced no output");
            return Ok(OcrOutcome::NoOutput);
        }

        let mut discard = Discard;
        let sink: &mut dyn ContentSink = match content {
            Some(sink) => sink,
            None => &mut discard,
        };
        OutputExtractor::extract(&result, config.output_format, sink).await?;

        info!(input = %input.display(), format = %config.output_format, "OCR text extracted");
        Ok(OcrOutcome::Extracted)
    }
}

fn reborrow<'s>(
    sink: &'s mut Option<&mut dyn MetadataSink>,
) -> Option<&'s mut dyn MetadataSink> {
    sink.as_deref_mut().map(|s| s as &mut dyn MetadataSink)
}

fn job_temp_dir(parent: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX);
    let dir = match parent {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    Ok(dir)
}

fn working_name(input: &Path) -> PathBuf {
    match input.extension() {
        Some(ext) => Path::new(WORKING_STEM).with_extension(ext),
        None => PathBuf::from(WORKING_STEM),
    }
}

/// Sniffs the content type and pixel dimensions. Failures are only logged.
async fn record_image_metadata(input: &Path, metadata: Option<&mut dyn MetadataSink>) {
    let Some(sink) = metadata else {
        return;
    };

    let path = input.to_path_buf();
    let sniffed = tokio::task::spawn_blocking(move || {
        let kind = match infer::get_from_path(&path) {
            Ok(kind) => kind.map(|k| k.mime_type().to_string()),
            Err(e) => {
                debug!(error = %e, "Content type sniffing failed");
                None
            }
        };
        let dimensions = match image::image_dimensions(&path) {
            Ok(dimensions) => Some(dimensions),
            Err(e) => {
                debug!(error = %e, "Could not read image dimensions");
                None
            }
        };
        (kind, dimensions)
    })
    .await;

    match sniffed {
        Ok((kind, dimensions)) => {
            if let Some(kind) = kind {
                sink.set(CONTENT_TYPE_KEY, kind);
            }
            if let Some((width, height)) = dimensions {
                sink.set(IMAGE_WIDTH_KEY, width.to_string());
                sink.set(IMAGE_HEIGHT_KEY, height.to_string());
            }
        }
        Err(e) => debug!(error = %e, "Image metadata task failed"),
    }
}

/// Content sink for callers that only want metadata.
struct Discard;

impl ContentSink for Discard {
    fn start_element(&mut self, _name: &str, _attributes: &[(String, String)]) -> Result<()> {
        Ok(())
    }

    fn end_element(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn characters(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }
}
