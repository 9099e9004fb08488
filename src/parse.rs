//! Format-specific text extraction for uploaded files.
//!
//! The [`DocumentParser`] capability turns raw bytes plus a declared
//! [`FileFormat`] into plain text with a self-reported confidence.
//! [`BuiltinParser`] handles PDF, OOXML (docx/pptx/xlsx), CSV, plain text and
//! Markdown locally and delegates images and audio to a [`MediaTranscriber`].

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::MediaTranscriber;
use crate::models::{word_count, ExtractionMethod, FileFormat};

const MAX_SHEETS: usize = 100;
const MAX_CELLS_PER_SHEET: usize = 100_000;
/// Decompressed size cap for any one OOXML part.
const MAX_PART_BYTES: u64 = 50 * 1024 * 1024;
/// PDFs yielding fewer words than this are probably scanned images.
const PDF_SPARSE_WORDS: usize = 20;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported file format: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("CSV parsing failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("media transcription failed: {0}")]
    Media(String),
    #[error("parser task failed: {0}")]
    Task(String),
}

/// Text recovered from a file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub text: String,
    pub confidence: f64,
    pub method: ExtractionMethod,
}

#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, bytes: &[u8], format: FileFormat) -> Result<ParsedDocument, ParseError>;
}

pub struct BuiltinParser {
    transcriber: Arc<dyn MediaTranscriber>,
}

impl BuiltinParser {
    pub fn new(transcriber: Arc<dyn MediaTranscriber>) -> Self {
        Self { transcriber }
    }
}

#[async_trait]
impl DocumentParser for BuiltinParser {
    async fn parse(&self, bytes: &[u8], format: FileFormat) -> Result<ParsedDocument, ParseError> {
        if format.is_audio() {
            let text = self
                .transcriber
                .transcribe_audio(bytes, format)
                .await
                .map_err(|e| ParseError::Media(e.to_string()))?;
            return Ok(ParsedDocument {
                text,
                confidence: 0.9,
                method: ExtractionMethod::AudioTranscription,
            });
        }
        if format.is_image() {
            let text = self
                .transcriber
                .describe_image(bytes, format)
                .await
                .map_err(|e| ParseError::Media(e.to_string()))?;
            return Ok(ParsedDocument {
                text,
                confidence: 0.7,
                method: ExtractionMethod::ImageDescription,
            });
        }

        // PDF and zip decoding are CPU-bound.
        let owned = bytes.to_vec();
        tokio::task::spawn_blocking(move || parse_local(&owned, format))
            .await
            .map_err(|e| ParseError::Task(e.to_string()))?
    }
}

/// Parse a format that needs no external service.
pub fn parse_local(bytes: &[u8], format: FileFormat) -> Result<ParsedDocument, ParseError> {
    match format {
        FileFormat::Pdf => {
            let text = extract_pdf(bytes)?;
            let confidence = if word_count(&text) < PDF_SPARSE_WORDS {
                0.5
            } else {
                0.85
            };
            Ok(ParsedDocument {
                text,
                confidence,
                method: ExtractionMethod::PdfText,
            })
        }
        FileFormat::Docx | FileFormat::Pptx | FileFormat::Xlsx => {
            let text = match format {
                FileFormat::Docx => extract_docx(bytes)?,
                FileFormat::Pptx => extract_pptx(bytes)?,
                _ => extract_xlsx(bytes)?,
            };
            Ok(ParsedDocument {
                text,
                confidence: 0.95,
                method: ExtractionMethod::OfficeXml,
            })
        }
        FileFormat::Csv => Ok(ParsedDocument {
            text: extract_csv(bytes)?,
            confidence: 0.9,
            method: ExtractionMethod::Delimited,
        }),
        FileFormat::Text | FileFormat::Markdown => {
            let (text, confidence) = decode_text(bytes);
            Ok(ParsedDocument {
                text,
                confidence,
                method: ExtractionMethod::PlainText,
            })
        }
        other => Err(ParseError::Unsupported(other.to_string())),
    }
}

/// UTF-8 decode; invalid sequences are replaced and lower the confidence.
fn decode_text(bytes: &[u8]) -> (String, f64) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), 1.0),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), 0.7),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ParseError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ParseError::Pdf(e.to_string()))
}

/// Render each record as `header: value` pairs, one record per line.
fn extract_csv(bytes: &[u8]) -> Result<String, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(i, v)| match headers.get(i).filter(|h| !h.trim().is_empty()) {
                Some(h) => format!("{}: {}", h.trim(), v.trim()),
                None => v.trim().to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        // Header-only files still carry some text.
        return Ok(headers.iter().collect::<Vec<_>>().join(", "));
    }
    Ok(lines.join("\n"))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_part(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ParseError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ParseError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ParseError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ParseError::Ooxml(format!("{} is larger than {} bytes", name, max_bytes)));
    }
    Ok(out)
}

fn open_zip(bytes: &[u8]) -> Result<Archive<'_>, ParseError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ParseError::Ooxml(e.to_string()))
}

/// Numbered entries (`slide3.xml`, `sheet12.xml`) in numeric order.
fn numbered_entries(
    archive: &Archive<'_>,
    prefix: &str,
) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(".xml")?;
            Some((n.parse().unwrap_or(u32::MAX), name.to_string()))
        })
        .collect();
    numbered.sort();
    numbered.into_iter().map(|(_, name)| name).collect()
}

fn extract_docx(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = open_zip(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml", MAX_PART_BYTES)?;
    extract_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = open_zip(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_part(&mut archive, &name, MAX_PART_BYTES)?;
        let text = extract_text_runs(&xml, b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

/// Collect `<*:t>` run text, starting a new line at the end of each
/// `paragraph` element.
fn extract_text_runs(xml: &[u8], paragraph: &[u8]) -> Result<String, ParseError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_t = false;
                } else if name.as_ref() == paragraph && !out.ends_with('\n') && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ParseError> {
    let mut archive = open_zip(bytes)?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(MAX_SHEETS)
    {
        let xml = read_part(&mut archive, &name, MAX_PART_BYTES)?;
        let cells = extract_xlsx_sheet_cells(&xml, &shared_strings)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n"))
}

fn read_shared_strings(
    archive: &mut Archive<'_>,
) -> Result<Vec<String>, ParseError> {
    use quick_xml::events::Event;

    // Workbooks with only numeric cells have no shared strings part.
    if archive.by_name("xl/sharedStrings.xml").is_err() {
        return Ok(Vec::new());
    }
    let xml = read_part(archive, "xl/sharedStrings.xml", MAX_PART_BYTES)?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, ParseError> {
    use quick_xml::events::Event;

    let mut cells = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_value = false;
    let mut shared_ref = false;
    loop {
        if cells.len() >= MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_ref = e
                        .attributes()
                        .flatten()
                        .any(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s");
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let raw = te.unescape().unwrap_or_default();
                let value = raw.trim();
                if shared_ref {
                    let index = value.parse::<usize>().ok();
                    cells.extend(index.and_then(|i| shared_strings.get(i)).cloned());
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_ref = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_formats_are_not_parsed_locally() {
        let err = parse_local(b"\x89PNG", FileFormat::Png).unwrap_err();
        assert!(matches!(err, ParseError::Unsupported(_)));
    }

    #[test]
    fn garbage_bytes_are_not_a_pdf() {
        let err = parse_local(b"not a pdf", FileFormat::Pdf).unwrap_err();
        assert!(matches!(err, ParseError::Pdf(_)));
    }

    #[test]
    fn docx_requires_a_zip_container() {
        let err = parse_local(b"not a zip", FileFormat::Docx).unwrap_err();
        assert!(matches!(err, ParseError::Ooxml(_)));
    }

    #[test]
    fn plain_text_strips_bom_and_flags_bad_utf8() {
        let parsed = parse_local(b"\xEF\xBB\xBFhello world", FileFormat::Text).unwrap();
        assert_eq!(parsed.text, "hello world");
        assert_eq!(parsed.confidence, 1.0);

        let parsed = parse_local(b"caf\xE9 offers", FileFormat::Markdown).unwrap();
        assert!(parsed.text.contains("offers"));
        assert_eq!(parsed.confidence, 0.7);
    }

    #[test]
    fn csv_rows_become_labelled_lines() {
        let csv = b"tactic,lift\nfree shipping,23%\nbundles,\n";
        let parsed = parse_local(csv, FileFormat::Csv).unwrap();
        assert_eq!(parsed.text, "tactic: free shipping; lift: 23%\ntactic: bundles");
        assert_eq!(parsed.method, ExtractionMethod::Delimited);
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Free shipping</w:t></w:r><w:r><w:t xml:space="preserve"> wins</w:t></w:r></w:p>
            <w:p><w:r><w:t>Test offers weekly</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = extract_text_runs(xml, b"p").unwrap();
        assert_eq!(text, "Free shipping wins\nTest offers weekly");
    }
}
