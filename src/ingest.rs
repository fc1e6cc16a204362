//! Document ingestion: extraction and normalization.
//!
//! Accepts raw document bytes plus a declared format from the allow-list
//! (PDF, DOCX, plain text) and produces whitespace-normalized,
//! case-preserved text with word-level token boundaries. The similarity
//! engine consumes the exact same token stream, so tokenization lives here
//! and nowhere else.

use std::io::Read;

use crate::error::{EngineError, Result};
use crate::models::{DocumentFormat, NormalizedText};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extracts and normalizes text from raw document bytes.
///
/// Extraction failures are terminal for the revision: no partial output is
/// ever returned.
pub fn ingest(bytes: &[u8], format: DocumentFormat) -> Result<NormalizedText> {
    let raw = match format {
        DocumentFormat::Pdf => extract_pdf(bytes)?,
        DocumentFormat::Docx => extract_docx(bytes)?,
        DocumentFormat::Text => extract_plain(bytes)?,
    };
    Ok(normalize(&raw))
}

/// Whitespace-normalize raw text: collapse runs of whitespace to single
/// spaces, trim, preserve case. Token = maximal run of non-whitespace.
pub fn normalize(raw: &str) -> NormalizedText {
    let tokens: Vec<String> = raw.split_whitespace().map(|t| t.to_string()).collect();
    let text = tokens.join(" ");
    NormalizedText { text, tokens }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| EngineError::Extraction(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| EngineError::Extraction("text is not valid UTF-8".to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| EngineError::Extraction(e.to_string()))?;
    let mut doc_xml = Vec::new();
    let mut found = false;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| EngineError::Extraction(e.to_string()))?;
        if entry.name() == "word/document.xml" {
            entry
                .take(MAX_XML_ENTRY_BYTES)
                .read_to_end(&mut doc_xml)
                .map_err(|e| EngineError::Extraction(e.to_string()))?;
            if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
                return Err(EngineError::Extraction(
                    "word/document.xml exceeds size limit".to_string(),
                ));
            }
            found = true;
            break;
        }
    }
    if !found {
        return Err(EngineError::Extraction(
            "word/document.xml not found".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Collect the text of `w:t` elements, separated by spaces so run boundaries
/// never glue words together.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(EngineError::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_normalized() {
        let text = ingest(b"Hello   world\n\n\tfoo  bar ", DocumentFormat::Text).unwrap();
        assert_eq!(text.text, "Hello world foo bar");
        assert_eq!(text.tokens, vec!["Hello", "world", "foo", "bar"]);
        assert_eq!(text.token_count(), 4);
    }

    #[test]
    fn case_is_preserved() {
        let text = ingest(b"Machine Learning IS great", DocumentFormat::Text).unwrap();
        assert_eq!(text.tokens[2], "IS");
    }

    #[test]
    fn empty_document_is_valid() {
        let text = ingest(b"", DocumentFormat::Text).unwrap();
        assert_eq!(text.token_count(), 0);
    }

    #[test]
    fn invalid_utf8_is_extraction_error() {
        let err = ingest(&[0xff, 0xfe, 0x41], DocumentFormat::Text).unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }

    #[test]
    fn invalid_pdf_is_extraction_error() {
        let err = ingest(b"not a pdf", DocumentFormat::Pdf).unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }

    #[test]
    fn invalid_zip_is_extraction_error_for_docx() {
        let err = ingest(b"not a zip", DocumentFormat::Docx).unwrap_err();
        assert!(matches!(err, EngineError::Extraction(_)));
    }

    #[test]
    fn normalization_is_deterministic() {
        let a = normalize("alpha  beta\tgamma");
        let b = normalize("alpha  beta\tgamma");
        assert_eq!(a, b);
    }
}
