use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{OcrflowError, Result};

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Result shape requested from tesseract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text, emitted verbatim.
    #[default]
    Txt,
    /// hOCR markup, filtered before re-emission.
    Hocr,
}

impl OutputFormat {
    /// Token passed to tesseract, which is also the extension of the file it writes.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Hocr => "hocr",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "txt" | "text" => Ok(OutputFormat::Txt),
            "hocr" => Ok(OutputFormat::Hocr),
            other => Err(format!("unknown output format '{other}' (expected txt or hocr)")),
        }
    }
}

/// ImageMagick `-filter` names accepted by [`OcrConfig::validate`].
pub const IMAGEMAGICK_FILTERS: &[&str] = &[
    "point",
    "hermite",
    "cubic",
    "box",
    "gaussian",
    "catrom",
    "triangle",
    "quadratic",
    "mitchell",
];

const VALID_DEPTHS: &[u32] = &[2, 4, 8, 16, 32, 64, 256, 4096];

/// One or more `+`-joined traineddata names, e.g. `eng+chi_sim`.
const LANGUAGE_PATTERN: &str = r"^[A-Za-z_]+(\+[A-Za-z_]+)*$";

static LANGUAGE_RE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(LANGUAGE_PATTERN));

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    /// Directory holding the tesseract binary; empty means `PATH`.
    pub tesseract_path: String,
    pub tessdata_path: String,
    /// Directory holding ImageMagick's `convert`; empty means `PATH`.
    pub imagemagick_path: String,
    pub python_path: String,
    pub deskew_script: Option<PathBuf>,
    pub language: String,
    pub page_seg_mode: String,
    pub output_format: OutputFormat,
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub timeout_secs: u64,
    pub density: u32,
    pub depth: u32,
    pub colorspace: String,
    pub filter: String,
    pub resize: u32,
    pub preserve_interword_spacing: bool,
    pub enable_preprocessing: bool,
    pub enable_deskew: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tesseract_path: env::var("OCR_TESSERACT_PATH").unwrap_or_default(),
            tessdata_path: env::var("OCR_TESSDATA_PATH").unwrap_or_default(),
            imagemagick_path: env::var("OCR_IMAGEMAGICK_PATH").unwrap_or_default(),
            python_path: env::var("OCR_PYTHON").unwrap_or_else(|_| "python".to_string()),
            deskew_script: parse_env_opt("OCR_DESKEW_SCRIPT"),
            language: env::var("OCR_LANGUAGE").unwrap_or_else(|_| "eng".to_string()),
            page_seg_mode: env::var("OCR_PAGE_SEG_MODE").unwrap_or_else(|_| "1".to_string()),
            output_format: parse_env_or("OCR_OUTPUT_FORMAT", OutputFormat::Txt),
            min_file_size: parse_env_or("OCR_MIN_FILE_SIZE", 0),
            max_file_size: parse_env_or("OCR_MAX_FILE_SIZE", i32::MAX as u64),
            timeout_secs: parse_env_or("OCR_TIMEOUT", 300),
            density: parse_env_or("OCR_DENSITY", 300),
            depth: parse_env_or("OCR_DEPTH", 4),
            colorspace: env::var("OCR_COLORSPACE").unwrap_or_else(|_| "gray".to_string()),
            filter: env::var("OCR_FILTER").unwrap_or_else(|_| "triangle".to_string()),
            resize: parse_env_or("OCR_RESIZE", 200),
            preserve_interword_spacing: parse_env_or("OCR_PRESERVE_INTERWORD_SPACING", true),
            enable_preprocessing: parse_env_or("OCR_PREPROCESS", true),
            enable_deskew: parse_env_or("OCR_DESKEW", true),
        }
    }
}

impl OcrConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Check every value that ends up on a tesseract or convert command line.
    pub fn validate(&self) -> Result<()> {
        let language_pattern = LANGUAGE_RE
            .as_ref()
            .map_err(|e| OcrflowError::Validation(format!("Bad language pattern: {e}")))?;
        if !language_pattern.is_match(&self.language) {
            return Err(OcrflowError::Validation(format!(
                "Invalid language code '{}'",
                self.language
            )));
        }

        match self.page_seg_mode.parse::<u8>() {
            Ok(mode) if mode <= 13 => {}
            _ => {
                return Err(OcrflowError::Validation(format!(
                    "Invalid page segmentation mode '{}', expected 0-13",
                    self.page_seg_mode
                )))
            }
        }

        if !(150..=1200).contains(&self.density) {
            return Err(OcrflowError::Validation(format!(
                "Invalid density {}, expected 150-1200",
                self.density
            )));
        }

        if !VALID_DEPTHS.contains(&self.depth) {
            return Err(OcrflowError::Validation(format!(
                "Invalid depth {}, expected one of {VALID_DEPTHS:?}",
                self.depth
            )));
        }

        if !(100..=900).contains(&self.resize) || self.resize % 100 != 0 {
            return Err(OcrflowError::Validation(format!(
                "Invalid resize {}, expected a multiple of 100 between 100 and 900",
                self.resize
            )));
        }

        if !IMAGEMAGICK_FILTERS.contains(&self.filter.to_lowercase().as_str()) {
            return Err(OcrflowError::Validation(format!(
                "Invalid filter '{}'",
                self.filter
            )));
        }

        if self.colorspace.is_empty() || !self.colorspace.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(OcrflowError::Validation(format!(
                "Invalid colorspace '{}'",
                self.colorspace
            )));
        }

        if self.min_file_size > self.max_file_size {
            return Err(OcrflowError::Validation(format!(
                "min_file_size {} exceeds max_file_size {}",
                self.min_file_size, self.max_file_size
            )));
        }

        if self.timeout_secs == 0 {
            return Err(OcrflowError::Validation(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const OCR_VARS: &[&str] = &[
        "OCR_TESSERACT_PATH",
        "OCR_LANGUAGE",
        "OCR_OUTPUT_FORMAT",
        "OCR_TIMEOUT",
        "OCR_RESIZE",
        "OCR_PREPROCESS",
        "OCR_DESKEW_SCRIPT",
    ];

    fn clear_ocr_env() {
        for var in OCR_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_ocr_config_defaults() {
        clear_ocr_env();

        let config = OcrConfig::default();
        assert_eq!(config.tesseract_path, "");
        assert_eq!(config.language, "eng");
        assert_eq!(config.page_seg_mode, "1");
        assert_eq!(config.output_format, OutputFormat::Txt);
        assert_eq!(config.min_file_size, 0);
        assert_eq!(config.max_file_size, 2147483647);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.resize, 200);
        assert!(config.preserve_interword_spacing);
        assert!(config.enable_preprocessing);
        assert!(config.enable_deskew);
        assert!(config.deskew_script.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_ocr_config_from_env() {
        clear_ocr_env();
        std::env::set_var("OCR_TESSERACT_PATH", "/opt/tesseract/bin");
        std::env::set_var("OCR_LANGUAGE", "eng+deu");
        std::env::set_var("OCR_OUTPUT_FORMAT", "hocr");
        std::env::set_var("OCR_TIMEOUT", "45");
        std::env::set_var("OCR_PREPROCESS", "false");
        std::env::set_var("OCR_DESKEW_SCRIPT", "/opt/scripts/rotation.py");

        let config = OcrConfig::from_env();
        assert_eq!(config.tesseract_path, "/opt/tesseract/bin");
        assert_eq!(config.language, "eng+deu");
        assert_eq!(config.output_format, OutputFormat::Hocr);
        assert_eq!(config.timeout_secs, 45);
        assert!(!config.enable_preprocessing);
        assert_eq!(
            config.deskew_script,
            Some(PathBuf::from("/opt/scripts/rotation.py"))
        );

        clear_ocr_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_falls_back_to_default() {
        clear_ocr_env();
        std::env::set_var("OCR_TIMEOUT", "soon");
        std::env::set_var("OCR_OUTPUT_FORMAT", "pdf");

        let config = OcrConfig::from_env();
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.output_format, OutputFormat::Txt);

        clear_ocr_env();
    }

    #[test]
    fn test_output_format_extension_is_lowercase_name() {
        assert_eq!(OutputFormat::Txt.extension(), "txt");
        assert_eq!(OutputFormat::Hocr.extension(), "hocr");
        assert_eq!("HOCR".parse::<OutputFormat>(), Ok(OutputFormat::Hocr));
    }

    fn valid_config() -> OcrConfig {
        OcrConfig {
            tesseract_path: String::new(),
            tessdata_path: String::new(),
            imagemagick_path: String::new(),
            python_path: "python".to_string(),
            deskew_script: None,
            language: "eng".to_string(),
            page_seg_mode: "1".to_string(),
            output_format: OutputFormat::Txt,
            min_file_size: 0,
            max_file_size: 1024,
            timeout_secs: 10,
            density: 300,
            depth: 4,
            colorspace: "gray".to_string(),
            filter: "triangle".to_string(),
            resize: 200,
            preserve_interword_spacing: false,
            enable_preprocessing: true,
            enable_deskew: true,
        }
    }

    #[test]
    fn test_validate_rejects_bad_language() {
        let config = OcrConfig {
            language: "eng; rm -rf /".to_string(),
            ..valid_config()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("language"), "{err}");

        let multi = OcrConfig {
            language: "eng+chi_sim".to_string(),
            ..valid_config()
        };
        assert!(multi.validate().is_ok());
    }

    #[test]
    fn test_language_pattern_is_shared_across_validations() {
        assert!(LANGUAGE_RE.is_ok());
        let config = valid_config();
        for _ in 0..3 {
            assert!(config.validate().is_ok());
        }
        let bad = OcrConfig {
            language: "eng+".to_string(),
            ..valid_config()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let cases = vec![
            OcrConfig {
                page_seg_mode: "14".to_string(),
                ..valid_config()
            },
            OcrConfig {
                density: 100,
                ..valid_config()
            },
            OcrConfig {
                depth: 3,
                ..valid_config()
            },
            OcrConfig {
                resize: 250,
                ..valid_config()
            },
            OcrConfig {
                filter: "sinc-ish".to_string(),
                ..valid_config()
            },
            OcrConfig {
                min_file_size: 2048,
                ..valid_config()
            },
            OcrConfig {
                timeout_secs: 0,
                ..valid_config()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(OcrflowError::Validation(_))),
                "expected validation failure for {config:?}"
            );
        }
    }
}
