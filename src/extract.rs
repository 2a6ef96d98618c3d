//! Text extraction for uploaded files.
//!
//! Uploads arrive as named byte blobs. [`content_type_for`] guesses the MIME
//! type from the file name, and [`to_text_document`] turns PDF and DOCX
//! bytes into a `text/plain` [`Document`] the catalog can chunk. Plain text
//! formats pass through unchanged.

use std::io::Read;

use thiserror::Error;

use docroute_core::Document;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// MIME type for `file_name`, by extension. Unknown extensions are
/// `application/octet-stream`.
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        "txt" | "text" | "log" => MIME_TEXT,
        "md" | "markdown" => MIME_MARKDOWN,
        "json" => "application/json",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Extract plain text from binary content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_DOCX => extract_docx(bytes),
        _ => Err(ExtractError::UnsupportedContentType(content_type.to_string())),
    }
}

/// Convert binary documents to text; textual documents are returned as-is.
pub fn to_text_document(document: Document) -> Result<Document, ExtractError> {
    match document.content_type.as_str() {
        MIME_PDF | MIME_DOCX => {
            let text = extract_text(&document.content, &document.content_type)?;
            Ok(Document::new(document.id, text.into_bytes(), MIME_TEXT))
        }
        _ => Ok(document),
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx("word/document.xml exceeds size limit".to_string()));
    }
    paragraphs_from_document_xml(&xml)
}

/// Concatenate `<w:t>` runs, one paragraph (`<w:p>`) per block.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_text = false,
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push(' '),
            Ok(Event::End(e)) if e.local_name().as_ref() == b"p" => {
                let para = current.trim();
                if !para.is_empty() {
                    paragraphs.push(para.to_string());
                }
                current.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx(body: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for("report.PDF"), MIME_PDF);
        assert_eq!(content_type_for("notes.md"), MIME_MARKDOWN);
        assert_eq!(content_type_for("a.b.docx"), MIME_DOCX);
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_docx_paragraphs() {
        let bytes = docx(
            "<w:p><w:r><w:t>First </w:t></w:r><w:r><w:t>paragraph.</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second &amp; last.</w:t></w:r></w:p><w:p/>",
        );
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "First paragraph.\n\nSecond & last.");
    }

    #[test]
    fn test_docx_converted_to_text_document() {
        let doc = Document::new("a.docx", docx("<w:p><w:r><w:t>Hello.</w:t></w:r></w:p>"), MIME_DOCX);
        let converted = to_text_document(doc).unwrap();
        assert_eq!(converted.content_type, MIME_TEXT);
        assert_eq!(converted.content, b"Hello.".to_vec());
    }

    #[test]
    fn test_text_passes_through() {
        let doc = Document::text("a.txt", "plain");
        assert_eq!(to_text_document(doc).unwrap().content, b"plain".to_vec());
    }

    #[test]
    fn test_bad_inputs_return_errors() {
        assert!(matches!(
            extract_text(b"foo", "application/octet-stream"),
            Err(ExtractError::UnsupportedContentType(_))
        ));
        assert!(matches!(extract_text(b"not a pdf", MIME_PDF), Err(ExtractError::Pdf(_))));
        assert!(matches!(extract_text(b"not a zip", MIME_DOCX), Err(ExtractError::Docx(_))));
        let missing = {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
            writer.start_file("other.xml", zip::write::SimpleFileOptions::default()).unwrap();
            writer.finish().unwrap().into_inner()
        };
        assert!(matches!(extract_text(&missing, MIME_DOCX), Err(ExtractError::Docx(_))));
    }
}
