//! Text extraction for uploaded files (PDF, DOCX).
//!
//! The upload path hands over raw bytes plus the client's filename; the format
//! is chosen from the extension by [`DocumentFormat::from_filename`] and this
//! module returns plain UTF-8 text. Failures never panic; they surface as
//! [`RagError::Extraction`] and the upload is rejected.

use std::io::Read;
use std::path::Path;

use crate::error::{RagError, Result};

/// Maximum decompressed bytes to read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
}

impl DocumentFormat {
    /// Pick the format from a filename extension, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("docx") => Ok(DocumentFormat::Docx),
            _ => Err(RagError::UnsupportedFormat(format!(
                "{} (only .pdf and .docx are accepted)",
                filename
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
        }
    }
}

/// Extract plain text from `bytes` in the given format.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String> {
    match format {
        DocumentFormat::Pdf => extract_pdf(bytes),
        DocumentFormat::Docx => extract_docx(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Extraction(format!("PDF: {}", e)))
}

fn ooxml_err(e: impl std::fmt::Display) -> RagError {
    RagError::Extraction(format!("DOCX: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_err("word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_err)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err("word/document.xml exceeds size limit"));
    }

    paragraphs_text(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_text(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().map_err(ooxml_err)?.as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}
