//! Text extraction from uploaded tender files.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use regex_lite::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file parsed but carries no text layer (scanned or empty).
    #[error("No extractable text in {0}")]
    NoText(String),

    #[error("Failed to read PDF {file}: {message}")]
    Pdf { file: String, message: String },

    #[error("Failed to read DOCX {file}: {message}")]
    Docx { file: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    pub fn from_file_name(file_name: &str) -> Self {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            _ => DocumentKind::Text,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentKind::Text => "text/plain; charset=utf-8",
        }
    }
}

/// Extract plain text from a file, choosing the reader by extension.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
    let kind = DocumentKind::from_file_name(file_name);
    let text = match kind {
        DocumentKind::Pdf => extract_pdf(file_name, bytes)?,
        DocumentKind::Docx => extract_docx(file_name, bytes)?,
        DocumentKind::Text => String::from_utf8_lossy(bytes).into_owned(),
    };

    if text.trim().is_empty() {
        return Err(DocumentError::NoText(file_name.to_string()));
    }
    debug!(file_name, ?kind, chars = text.len(), "Extracted document text");
    Ok(text)
}

fn extract_pdf(file_name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
    let pdf_err = |message: String| DocumentError::Pdf {
        file: file_name.to_string(),
        message,
    };
    // pdf-extract panics on some malformed inputs.
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| pdf_err("parser panicked".to_string()))?;
    result.map_err(|e| pdf_err(e.to_string()))
}

static DOCX_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|</w:p>|<w:tab/>|<w:br\s*/>")
        .expect("docx token regex")
});

fn extract_docx(file_name: &str, bytes: &[u8]) -> Result<String, DocumentError> {
    let docx_err = |message: String| DocumentError::Docx {
        file: file_name.to_string(),
        message,
    };
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| docx_err(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| docx_err(e.to_string()))?
        .read_to_string(&mut xml)
        .map_err(|e| docx_err(e.to_string()))?;

    Ok(docx_xml_to_text(&xml))
}

fn docx_xml_to_text(xml: &str) -> String {
    let mut out = String::new();
    for caps in DOCX_TOKEN.captures_iter(xml) {
        match caps.get(1) {
            Some(run) => out.push_str(&decode_entities(run.as_str())),
            None => match &caps[0] {
                "</w:p>" => out.push('\n'),
                "<w:tab/>" => out.push('\t'),
                _ => out.push('\n'),
            },
        }
    }
    out.trim_end().to_string()
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
