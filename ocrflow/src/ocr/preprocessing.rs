use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OcrConfig;
use crate::error::Result;
use crate::models::{MetadataSink, NORMALIZE_ERROR_KEY, SKEW_ANGLE_KEY, SKEW_ERROR_KEY};

use super::process::{ProcessInvoker, ProcessRequest};
use super::stats::Phase;
use super::tools::{resolve_tool, IMAGEMAGICK_PROG};

/// Rotation used when skew detection is disabled or fails.
pub const DEFAULT_ANGLE: &str = "0.00";

/// Result of asking the skew detection script for a rotation angle.
#[derive(Debug, Clone, PartialEq)]
pub enum SkewOutcome {
    Detected(f64),
    Failed(String),
}

impl SkewOutcome {
    /// The `-rotate` argument for ImageMagick.
    pub fn angle(&self) -> String {
        match self {
            SkewOutcome::Detected(degrees) => format!("{degrees:.2}"),
            SkewOutcome::Failed(_) => DEFAULT_ANGLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// The working copy was rewritten in place.
    Normalized,
    /// ImageMagick is not available, the working copy is untouched.
    Skipped,
    /// ImageMagick ran and failed; the working copy is used as-is.
    Failed(String),
}

/// What happened to the working copy before OCR.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessReport {
    /// `None` when deskewing is disabled.
    pub skew: Option<SkewOutcome>,
    pub normalize: NormalizeOutcome,
}

impl PreprocessReport {
    pub fn skipped() -> Self {
        Self {
            skew: None,
            normalize: NormalizeOutcome::Skipped,
        }
    }
}

/// Best-effort image cleanup ahead of OCR: skew detection through an external
/// script, then density/depth/colorspace/resize/rotate through ImageMagick.
///
/// Neither stage can fail the job. The only error that escapes is
/// cancellation, so an interrupted job does not leave a child running.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    invoker: ProcessInvoker,
}

impl ImagePreprocessor {
    pub fn new(invoker: ProcessInvoker) -> Self {
        Self { invoker }
    }

    /// Run both stages against `image`, which must be a private working copy.
    pub async fn preprocess(
        &self,
        image: &Path,
        config: &OcrConfig,
        mut metadata: Option<&mut dyn MetadataSink>,
        cancel: &CancellationToken,
    ) -> Result<PreprocessReport> {
        let skew = if config.enable_deskew {
            Some(self.detect_skew(image, config, cancel).await?)
        } else {
            None
        };

        let angle = match &skew {
            Some(outcome @ SkewOutcome::Detected(_)) => {
                let angle = outcome.angle();
                if let Some(sink) = metadata.as_deref_mut() {
                    sink.set(SKEW_ANGLE_KEY, angle.clone());
                }
                angle
            }
            Some(SkewOutcome::Failed(reason)) => {
                warn!(
                    "Skew detection failed, assuming zero skew. Detector said: {}",
                    reason
                );
                if let Some(sink) = metadata.as_deref_mut() {
                    sink.set(SKEW_ERROR_KEY, reason.clone());
                }
                DEFAULT_ANGLE.to_string()
            }
            None => DEFAULT_ANGLE.to_string(),
        };

        let normalize = self.normalize(image, &angle, config, cancel).await?;
        if let NormalizeOutcome::Failed(reason) = &normalize {
            warn!(
                "ImageMagick failed, OCR will use the original image. ImageMagick said: {}",
                reason
            );
            if let Some(sink) = metadata.as_deref_mut() {
                sink.set(NORMALIZE_ERROR_KEY, reason.clone());
            }
        }

        Ok(PreprocessReport { skew, normalize })
    }

    /// Stage A. Expects a single floating point number of degrees on stdout.
    pub async fn detect_skew(
        &self,
        image: &Path,
        config: &OcrConfig,
        cancel: &CancellationToken,
    ) -> Result<SkewOutcome> {
        let Some(script) = &config.deskew_script else {
            return Ok(SkewOutcome::Failed(
                "no skew detection script configured".to_string(),
            ));
        };

        let request = ProcessRequest::new(config.python_path.clone())
            .arg(script.as_os_str())
            .arg("-f")
            .arg(image.as_os_str());

        let output = match self
            .invoker
            .run(&request, Phase::Detect, job_timeout(config), cancel)
            .await
        {
            Ok(output) => output,
            Err(e) if e.is_interruption() => return Err(e),
            Err(e) => return Ok(SkewOutcome::Failed(e.to_string())),
        };

        if !output.success() {
            return Ok(SkewOutcome::Failed(format!(
                "{} ({})",
                output.diagnostic(),
                output.status
            )));
        }

        match output.stdout.trim().parse::<f64>() {
            Ok(degrees) if degrees.is_finite() => {
                info!(angle = degrees, "Skew detected");
                Ok(SkewOutcome::Detected(degrees))
            }
            _ => Ok(SkewOutcome::Failed(format!(
                "unexpected skew detector output: {}",
                output.diagnostic()
            ))),
        }
    }

    /// Stage B. Rewrites `image` in place.
    pub async fn normalize(
        &self,
        image: &Path,
        angle: &str,
        config: &OcrConfig,
        cancel: &CancellationToken,
    ) -> Result<NormalizeOutcome> {
        let request = normalize_request(image, angle, config);

        let output = match self
            .invoker
            .run(&request, Phase::Normalize, job_timeout(config), cancel)
            .await
        {
            Ok(output) => output,
            Err(e) if e.is_interruption() => return Err(e),
            Err(e) => return Ok(NormalizeOutcome::Failed(e.to_string())),
        };

        if output.success() {
            info!(angle, "Image normalized for OCR");
            Ok(NormalizeOutcome::Normalized)
        } else {
            Ok(NormalizeOutcome::Failed(format!(
                "{} ({})",
                output.diagnostic(),
                output.status
            )))
        }
    }
}

fn job_timeout(config: &OcrConfig) -> Duration {
    Duration::from_secs(config.timeout_secs)
}

fn normalize_request(image: &Path, angle: &str, config: &OcrConfig) -> ProcessRequest {
    ProcessRequest::new(resolve_tool(&config.imagemagick_path, IMAGEMAGICK_PROG))
        .args(["-density".to_string(), config.density.to_string()])
        .args(["-depth".to_string(), config.depth.to_string()])
        .args(["-colorspace", config.colorspace.as_str()])
        .args(["-filter", config.filter.as_str()])
        .args(["-resize".to_string(), format!("{}%", config.resize)])
        .args(["-rotate", angle])
        .arg(image.as_os_str())
        .arg(image.as_os_str())
}
