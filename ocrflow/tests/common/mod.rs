// Shared helpers for the pipeline integration tests.
#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Once;

use ocrflow::{OcrConfig, OutputFormat};

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Write an executable shell script that answers `--version` and otherwise runs `body`.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!("#!/bin/sh\n[ \"$1\" = \"--version\" ] && exit 0\n{body}\n");
    fs::write(&path, script).unwrap_or_else(|e| panic!("Failed to write {name}: {e}"));
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A tesseract that writes `text` to `<prefix>.<format>`.
pub fn fake_tesseract(dir: &Path, text: &str) -> PathBuf {
    let result = dir.join("tesseract-result");
    fs::write(&result, text).unwrap();
    fake_tool(
        dir,
        ocrflow::ocr::TESSERACT_PROG,
        &format!("cat '{}' > \"$2.$7\"", result.display()),
    )
}

/// A small real PNG, so content sniffing and dimension probing have something to read.
pub fn sample_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(4, 3, image::Rgb([255, 255, 255]))
        .save(&path)
        .unwrap();
    path
}

/// Config pointing both tools at `tools`, with preprocessing off.
pub fn test_config(tools: &Path) -> OcrConfig {
    let tools = tools.to_string_lossy().into_owned();
    OcrConfig {
        tesseract_path: tools.clone(),
        tessdata_path: String::new(),
        imagemagick_path: tools,
        python_path: "python".to_string(),
        deskew_script: None,
        language: "eng".to_string(),
        page_seg_mode: "1".to_string(),
        output_format: OutputFormat::Txt,
        min_file_size: 0,
        max_file_size: i32::MAX as u64,
        timeout_secs: 10,
        density: 300,
        depth: 4,
        colorspace: "gray".to_string(),
        filter: "triangle".to_string(),
        resize: 200,
        preserve_interword_spacing: true,
        enable_preprocessing: false,
        enable_deskew: false,
    }
}

pub fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
