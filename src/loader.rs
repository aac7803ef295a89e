//! Text extraction from uploaded files
//!
//! Supported: `.pdf`, `.json`, `.txt`, `.md`. The result is plain text with
//! one unit per line, ready for segmentation.

use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::segment::{clean_text, split_sentences};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "json", "txt", "md"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Json,
    Text,
}

impl FileKind {
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Ok(FileKind::Pdf),
            "json" => Ok(FileKind::Json),
            "txt" | "md" => Ok(FileKind::Text),
            _ => Err(Error::InvalidInput(format!(
                "unsupported file type '{}' (allowed: {})",
                filename,
                SUPPORTED_EXTENSIONS
                    .iter()
                    .map(|e| format!(".{}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Extract text from an uploaded file. Rejects empty files, files over
/// `max_bytes`, unsupported extensions and files that yield no text.
pub fn extract_text(filename: &str, bytes: &[u8], max_bytes: usize) -> Result<String> {
    let kind = FileKind::from_filename(filename)?;
    if bytes.is_empty() {
        return Err(Error::InvalidInput(format!("'{}' is empty", filename)));
    }
    if bytes.len() > max_bytes {
        return Err(Error::InvalidInput(format!(
            "'{}' is {} bytes, limit is {}",
            filename,
            bytes.len(),
            max_bytes
        )));
    }

    let text = match kind {
        FileKind::Pdf => pdf_text(bytes)?,
        FileKind::Json => json_texts(&decode_utf8(filename, bytes)?).join("\n"),
        FileKind::Text => decode_utf8(filename, bytes)?,
    };

    if text.trim().is_empty() {
        return Err(Error::Extraction(format!("no text found in '{}'", filename)));
    }
    info!("Extracted {} chars from {} ({:?})", text.chars().count(), filename, kind);
    Ok(text)
}

fn decode_utf8(filename: &str, bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| Error::Extraction(format!("'{}' is not valid UTF-8: {}", filename, e)))
}

/// PDF text reflowed to one sentence per line. Hard line wraps inside a
/// paragraph are joined first.
fn pdf_text(bytes: &[u8]) -> Result<String> {
    // pdf-extract panics on some malformed files
    let extracted = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)))
        .map_err(|_| Error::Extraction("PDF parser crashed on this file".to_string()))?
        .map_err(|e| Error::Extraction(format!("failed to read PDF: {}", e)))?;

    let mut lines = Vec::new();
    for paragraph in extracted.split("\n\n") {
        let flowed = clean_text(paragraph);
        if flowed.is_empty() {
            continue;
        }
        lines.extend(split_sentences(&flowed));
    }
    debug!("PDF reflowed into {} lines", lines.len());
    Ok(lines.join("\n"))
}

/// Text units from a JSON upload:
/// - object: its non-blank string values
/// - array: strings as-is, string values of objects, anything else serialized
/// - invalid JSON: the raw text
///
/// Falls back to the serialized document when nothing else qualifies.
pub fn json_texts(raw: &str) -> Vec<String> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            debug!("Upload is not valid JSON ({}), using raw text", e);
            return vec![raw.to_string()];
        }
    };

    fn string_values(map: &serde_json::Map<String, Value>) -> impl Iterator<Item = String> + '_ {
        map.values()
            .filter_map(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    let texts: Vec<String> = match &value {
        Value::Object(map) => string_values(map).collect(),
        Value::Array(items) => items
            .iter()
            .flat_map(|item| match item {
                Value::Object(map) => string_values(map).collect::<Vec<_>>(),
                Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
                Value::String(_) => vec![],
                other => vec![other.to_string()],
            })
            .collect(),
        other => vec![other.to_string()],
    };

    if texts.is_empty() {
        vec![value.to_string()]
    } else {
        texts
    }
}
