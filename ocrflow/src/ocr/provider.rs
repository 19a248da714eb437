use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{OcrConfig, OutputFormat};
use crate::error::Result;
use crate::models::{MetadataSink, ENGINE_EXIT_KEY};

use super::process::{ProcessInvoker, ProcessOutput, ProcessRequest};
use super::stats::{Phase, TimingStats};
use super::tools::{resolve_tool, TESSERACT_PROG};

/// Where tesseract writes its result for a given output prefix.
pub fn result_path(prefix: &Path, format: OutputFormat) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

/// Drives the tesseract command line.
#[derive(Debug, Clone)]
pub struct TesseractRunner {
    invoker: ProcessInvoker,
    stats: Arc<TimingStats>,
}

impl TesseractRunner {
    pub fn new(invoker: ProcessInvoker, stats: Arc<TimingStats>) -> Self {
        Self { invoker, stats }
    }

    /// Run tesseract on `input`, writing `<output_prefix>.<ext>`.
    ///
    /// Returns the path tesseract was asked to write. The file may be missing,
    /// which callers treat as "no text produced". A non-zero exit is logged and
    /// recorded in `metadata` but is not an error.
    pub async fn run(
        &self,
        input: &Path,
        output_prefix: &Path,
        config: &OcrConfig,
        metadata: Option<&mut dyn MetadataSink>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let request = build_request(input, output_prefix, config);
        let timeout = Duration::from_secs(config.timeout_secs);

        let result = self.invoker.run(&request, Phase::Ocr, timeout, cancel).await;

        let jobs = self.stats.increment_jobs();
        let snapshot = self.stats.snapshot();
        info!(
            jobs,
            detect_secs = snapshot.detect_secs,
            normalize_secs = snapshot.normalize_secs,
            ocr_secs = snapshot.ocr_secs,
            "Cumulative OCR timings"
        );

        let output = result?;
        if !output.success() {
            report_exit(&output, metadata);
        }

        Ok(result_path(output_prefix, config.output_format))
    }
}

fn report_exit(output: &ProcessOutput, metadata: Option<&mut dyn MetadataSink>) {
    warn!(
        status = %output.status,
        "tesseract exited unsuccessfully: {}",
        output.diagnostic()
    );
    if let Some(sink) = metadata {
        sink.set(ENGINE_EXIT_KEY, output.status.to_string());
    }
}

fn build_request(input: &Path, output_prefix: &Path, config: &OcrConfig) -> ProcessRequest {
    let spacing = if config.preserve_interword_spacing { 1 } else { 0 };

    let mut request = ProcessRequest::new(resolve_tool(&config.tesseract_path, TESSERACT_PROG))
        .arg(input.as_os_str())
        .arg(output_prefix.as_os_str())
        .args(["-l", config.language.as_str()])
        .args(["-psm", config.page_seg_mode.as_str()])
        .arg(config.output_format.extension())
        .arg("-c")
        .arg(format!("preserve_interword_spaces={spacing}"));

    if !config.tessdata_path.trim().is_empty() {
        request = request.env("TESSDATA_PREFIX", &config.tessdata_path);
    } else if !config.tesseract_path.trim().is_empty() {
        request = request.env("TESSDATA_PREFIX", &config.tesseract_path);
    }

    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn test_config() -> OcrConfig {
        OcrConfig {
            tesseract_path: String::new(),
            tessdata_path: String::new(),
            imagemagick_path: String::new(),
            python_path: "python".to_string(),
            deskew_script: None,
            language: "eng+deu".to_string(),
            page_seg_mode: "3".to_string(),
            output_format: OutputFormat::Hocr,
            min_file_size: 0,
            max_file_size: u64::MAX,
            timeout_secs: 10,
            density: 300,
            depth: 4,
            colorspace: "gray".to_string(),
            filter: "triangle".to_string(),
            resize: 200,
            preserve_interword_spacing: false,
            enable_preprocessing: false,
            enable_deskew: false,
        }
    }

    fn runner() -> (TesseractRunner, Arc<TimingStats>) {
        let stats = Arc::new(TimingStats::new());
        let runner =
            TesseractRunner::new(ProcessInvoker::new(Arc::clone(&stats)), Arc::clone(&stats));
        (runner, stats)
    }

    #[test]
    fn test_result_path_appends_extension() {
        assert_eq!(
            result_path(Path::new("/tmp/job/ocr-output"), OutputFormat::Txt),
            PathBuf::from("/tmp/job/ocr-output.txt")
        );
        assert_eq!(
            result_path(Path::new("/tmp/job/ocr-output"), OutputFormat::Hocr),
            PathBuf::from("/tmp/job/ocr-output.hocr")
        );
    }

    #[test]
    fn test_command_line_layout() {
        let request = build_request(Path::new("in.png"), Path::new("out"), &test_config());

        assert_eq!(request.program, TESSERACT_PROG);
        let expected: Vec<OsString> = [
            "in.png",
            "out",
            "-l",
            "eng+deu",
            "-psm",
            "3",
            "hocr",
            "-c",
            "preserve_interword_spaces=0",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(request.args, expected);
        assert!(request.env.is_empty());
    }

    #[test]
    fn test_tessdata_prefix_precedence() {
        let config = OcrConfig {
            tesseract_path: "/opt/tesseract".to_string(),
            ..test_config()
        };
        let request = build_request(Path::new("in.png"), Path::new("out"), &config);
        assert_eq!(
            request.env,
            vec![("TESSDATA_PREFIX".to_string(), OsString::from("/opt/tesseract"))]
        );

        let config = OcrConfig {
            tesseract_path: "/opt/tesseract".to_string(),
            tessdata_path: "/usr/share/tessdata".to_string(),
            ..test_config()
        };
        let request = build_request(Path::new("in.png"), Path::new("out"), &config);
        assert_eq!(
            request.env,
            vec![("TESSDATA_PREFIX".to_string(), OsString::from("/usr/share/tessdata"))]
        );
    }

    #[tokio::test]
    async fn test_launch_failure_still_counts_job() {
        let (runner, stats) = runner();
        let config = OcrConfig {
            tesseract_path: "/nonexistent/ocrflow-test".to_string(),
            ..test_config()
        };

        let err = runner
            .run(
                Path::new("in.png"),
                Path::new("out"),
                &config,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, crate::error::OcrflowError::Launch { .. }), "{err}");
        assert_eq!(stats.snapshot().jobs, 1);
    }

    #[cfg(unix)]
    mod with_scripts {
        use super::*;
        use crate::models::Metadata;
        use crate::ocr::testutil::write_script;

        #[tokio::test]
        async fn test_writes_result_next_to_prefix() {
            let dir = tempfile::tempdir().unwrap();
            write_script(dir.path(), TESSERACT_PROG, "printf 'Hello' > \"$2.$7\"");
            let config = OcrConfig {
                tesseract_path: dir.path().to_string_lossy().into_owned(),
                output_format: OutputFormat::Txt,
                ..test_config()
            };
            let prefix = dir.path().join("ocr-output");
            let (runner, stats) = runner();

            let path = runner
                .run(
                    Path::new("in.png"),
                    &prefix,
                    &config,
                    None,
                    &CancellationToken::new(),
                )
                .await
                .unwrap();

            assert_eq!(path, dir.path().join("ocr-output.txt"));
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "Hello");
            assert!(stats.snapshot().ocr_secs > 0.0);
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_recorded_not_raised() {
            let dir = tempfile::tempdir().unwrap();
            write_script(
                dir.path(),
                TESSERACT_PROG,
                "echo 'Error opening data file' >&2; exit 1",
            );
            let config = OcrConfig {
                tesseract_path: dir.path().to_string_lossy().into_owned(),
                ..test_config()
            };
            let mut metadata = Metadata::new();
            let (runner, _) = runner();

            let path = runner
                .run(
                    Path::new("in.png"),
                    &dir.path().join("ocr-output"),
                    &config,
                    Some(&mut metadata),
                    &CancellationToken::new(),
                )
                .await
                .unwrap();

            assert!(!path.exists());
            assert!(metadata.contains_key(ENGINE_EXIT_KEY));
        }
    }
}
