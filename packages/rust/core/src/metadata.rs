//! Author and creation date from the PDF info dictionary.

use std::path::Path;

use chrono::NaiveDateTime;
use lopdf::{Document, Object};
use serde::Serialize;
use tracing::debug;

use pdfaudit_shared::UNKNOWN;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentMetadata {
    pub author: String,
    pub date: String,
}

impl Default for DocumentMetadata {
    fn default() -> Self {
        Self {
            author: UNKNOWN.to_string(),
            date: UNKNOWN.to_string(),
        }
    }
}

/// Read author and creation date. Any failure yields `Unknown` for both.
pub fn read_metadata(path: &Path) -> DocumentMetadata {
    match load_info(path) {
        Some(meta) => meta,
        None => {
            debug!(path = %path.display(), "no readable info dictionary");
            DocumentMetadata::default()
        }
    }
}

fn load_info(path: &Path) -> Option<DocumentMetadata> {
    let doc = Document::load(path).ok()?;
    let info = match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    let info = info.as_dict().ok()?;

    let mut meta = DocumentMetadata::default();
    if let Some(author) = info.get(b"Author").ok().and_then(text_of) {
        let author = author.trim();
        if !author.is_empty() {
            meta.author = author.to_string();
        }
    }
    if let Some(raw) = info.get(b"CreationDate").ok().and_then(text_of) {
        meta.date = format_pdf_date(&raw);
    }
    Some(meta)
}

fn text_of(object: &Object) -> Option<String> {
    match object {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

/// PDF text strings are UTF-16BE with a byte-order mark, or single-byte.
fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// `D:YYYYMMDDHHmmSS…` to `Mon. DD, YYYY`; the stripped raw value when it
/// does not parse.
pub fn format_pdf_date(raw: &str) -> String {
    let stripped = raw.trim().replace("D:", "");
    let stripped = stripped
        .split('+')
        .next()
        .and_then(|s| s.split('Z').next())
        .unwrap_or_default();

    let head: String = stripped.chars().take(14).collect();
    match NaiveDateTime::parse_from_str(&head, "%Y%m%d%H%M%S") {
        Ok(dt) => dt.format("%b. %d, %Y").to_string(),
        Err(_) => stripped.to_string(),
    }
}
