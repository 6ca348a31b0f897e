//! Content extraction for uploaded documentation.
//!
//! Turns uploaded bytes plus a declared (or guessed) MIME type into plain
//! UTF-8 text for the analyzer. Text formats pass through; PDF and DOCX
//! are decoded.
//!
//! | MIME type | Handling |
//! |-----------|----------|
//! | `text/*`, JSON, YAML, XML | UTF-8 passthrough (lossy) |
//! | `application/pdf` | `pdf-extract` |
//! | DOCX | `word/document.xml` paragraphs via `zip` + `quick-xml` |
//!
//! A missing or `application/octet-stream` type is guessed from the file
//! extension.

use std::io::Read;

use quick_xml::events::Event;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("document contains no extractable text")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub text: String,
    /// The MIME type the content was interpreted as.
    pub mime_type: String,
}

/// Guess a MIME type from a filename's extension.
pub fn guess_mime_type(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "md" | "markdown" => "text/markdown",
        "txt" | "text" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "xml" => "application/xml",
        "pdf" => MIME_PDF,
        "docx" => MIME_DOCX,
        _ => return None,
    };
    Some(mime)
}

/// Resolve the effective MIME type for an upload.
pub fn effective_mime_type(declared: Option<&str>, filename: &str) -> String {
    let declared = declared
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty() && m != MIME_OCTET_STREAM);
    match declared {
        Some(m) => m,
        None => guess_mime_type(filename)
            .unwrap_or(MIME_OCTET_STREAM)
            .to_string(),
    }
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/yaml" | "application/x-yaml" | "application/xml"
        )
}

/// Extract plain text from uploaded bytes.
pub fn extract_content(
    bytes: &[u8],
    mime_type: Option<&str>,
    filename: &str,
) -> Result<ExtractedContent, ExtractError> {
    let mime = effective_mime_type(mime_type, filename);
    let text = if is_textual(&mime) {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        match mime.as_str() {
            MIME_PDF => extract_pdf(bytes)?,
            MIME_DOCX => extract_docx(bytes)?,
            _ => return Err(ExtractError::UnsupportedContentType(mime)),
        }
    };

    if text.trim().is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(ExtractedContent {
        text,
        mime_type: mime,
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    docx_paragraphs(&xml)
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn markdown_passes_through() {
        let out = extract_content(b"# Users API\nGET /users", None, "api.md").unwrap();
        assert_eq!(out.mime_type, "text/markdown");
        assert!(out.text.contains("GET /users"));
    }

    #[test]
    fn declared_type_wins_over_extension() {
        let out = extract_content(b"{}", Some("application/json; charset=utf-8"), "x.bin").unwrap();
        assert_eq!(out.mime_type, "application/json");
    }

    #[test]
    fn octet_stream_falls_back_to_extension() {
        assert_eq!(
            effective_mime_type(Some("application/octet-stream"), "openapi.yaml"),
            "application/yaml"
        );
    }

    #[test]
    fn unknown_binary_is_unsupported() {
        let err = extract_content(b"\x00\x01", None, "blob.bin").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn whitespace_only_is_empty() {
        let err = extract_content(b"  \n\t", Some("text/plain"), "a.txt").unwrap_err();
        assert!(matches!(err, ExtractError::Empty));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_content(b"not a pdf", Some(MIME_PDF), "a.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t>GET /users</w:t></w:r></w:p>
<w:p><w:r><w:t xml:space="preserve">Basic </w:t></w:r><w:r><w:t>Auth</w:t></w:r></w:p>
</w:body></w:document>"#;
        let out = extract_content(&docx_bytes(xml), None, "guide.docx").unwrap();
        assert_eq!(out.text, "GET /users\nBasic Auth\n");
    }

    #[test]
    fn docx_without_document_xml_errors() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let err = extract_content(&bytes, Some(MIME_DOCX), "x.docx").unwrap_err();
        assert!(matches!(err, ExtractError::Docx(_)));
    }
}
