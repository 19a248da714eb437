//! Turns a tesseract result file into content events.

use std::path::Path;

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::config::OutputFormat;
use crate::error::{OcrflowError, Result};
use crate::models::ContentSink;

/// Element wrapping everything extracted from one image.
pub const BLOCK_ELEMENT: &str = "div";
pub const BLOCK_CLASS: &str = "ocr";

/// Document-level hOCR elements that the host document already provides.
pub fn is_wrapper_element(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "html" | "head" | "title" | "meta" | "body"
    )
}

pub struct OutputExtractor;

impl OutputExtractor {
    /// Read `path` and push its content into `sink` inside one `div.ocr` block.
    pub async fn extract(
        path: &Path,
        format: OutputFormat,
        sink: &mut dyn ContentSink,
    ) -> Result<()> {
        let bytes = tokio::fs::read(path).await?;
        match format {
            OutputFormat::Txt => Self::extract_text(&bytes, sink),
            OutputFormat::Hocr => Self::extract_hocr(&bytes, sink),
        }
    }

    pub fn extract_text(bytes: &[u8], sink: &mut dyn ContentSink) -> Result<()> {
        let text = String::from_utf8_lossy(bytes);
        open_block(sink)?;
        if !text.is_empty() {
            sink.characters(&text)?;
        }
        sink.end_element(BLOCK_ELEMENT)
    }

    pub fn extract_hocr(bytes: &[u8], sink: &mut dyn ContentSink) -> Result<()> {
        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().expand_empty_elements = true;

        // Text only counts inside the root element and outside <head>.
        let mut open: Vec<String> = Vec::new();
        let mut head_depth = 0usize;

        open_block(sink)?;
        loop {
            let event = reader.read_event().map_err(|e| {
                OcrflowError::Markup(format!("{e} at byte {}", reader.error_position()))
            })?;

            match event {
                Event::Start(e) => {
                    let name = utf8(e.name().as_ref())?.to_string();
                    if name.eq_ignore_ascii_case("head") {
                        head_depth += 1;
                    }
                    if !is_wrapper_element(&name) {
                        let attributes = attributes(&e)?;
                        sink.start_element(&name, &attributes)?;
                    }
                    open.push(name);
                }
                Event::End(e) => {
                    let name = utf8(e.name().as_ref())?.to_string();
                    open.pop();
                    if !is_wrapper_element(&name) {
                        sink.end_element(&name)?;
                    }
                    if name.eq_ignore_ascii_case("head") {
                        head_depth = head_depth.saturating_sub(1);
                    }
                }
                Event::Text(e) => {
                    if in_body(&open, head_depth) {
                        let text = utf8(&e)?;
                        if !text.is_empty() {
                            sink.characters(text)?;
                        }
                    }
                }
                Event::CData(e) => {
                    if in_body(&open, head_depth) {
                        sink.characters(utf8(&e)?)?;
                    }
                }
                Event::GeneralRef(e) => {
                    if in_body(&open, head_depth) {
                        let text = resolve_entity(utf8(&e)?);
                        sink.characters(&text)?;
                    }
                }
                Event::Eof => break,
                // Declarations, doctype, comments, processing instructions.
                _ => {}
            }
        }

        if let Some(name) = open.last() {
            return Err(OcrflowError::Markup(format!(
                "unexpected end of document inside <{name}>"
            )));
        }

        sink.end_element(BLOCK_ELEMENT)
    }
}

fn in_body(open: &[String], head_depth: usize) -> bool {
    !open.is_empty() && head_depth == 0
}

fn open_block(sink: &mut dyn ContentSink) -> Result<()> {
    sink.start_element(
        BLOCK_ELEMENT,
        &[("class".to_string(), BLOCK_CLASS.to_string())],
    )
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| OcrflowError::Markup(format!("invalid UTF-8: {e}")))
}

fn attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| OcrflowError::Markup(format!("bad attribute: {e}")))?;
        let key = utf8(attr.key.as_ref())?.to_string();
        let raw = utf8(&attr.value)?;
        let value = unescape(raw)
            .map_err(|e| OcrflowError::Markup(format!("bad attribute {key}: {e}")))?;
        out.push((key, value.into_owned()));
    }
    Ok(out)
}

/// Predefined and numeric references resolve; anything else (an HTML-only
/// entity such as `nbsp`) is kept literally.
fn resolve_entity(name: &str) -> String {
    let reference = format!("&{name};");
    match unescape(&reference) {
        Ok(text) => text.into_owned(),
        Err(_) => reference,
    }
}
