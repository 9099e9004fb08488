//! Multi-format upload parsing with real file bytes.

use std::io::Write;
use std::sync::Arc;

use adkb::llm::DisabledLlm;
use adkb::models::{ExtractionMethod, FileFormat};
use adkb::parse::{parse_local, BuiltinParser, DocumentParser, ParseError};

/// Minimal single-page PDF showing `phrase`, with correct xref offsets.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// ZIP archive with the given `(entry name, contents)` pairs.
fn zip_with(entries: &[(&str, String)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, contents) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    zip_with(&[(
        "word/document.xml",
        format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        ),
    )])
}

fn slide(text: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
        text
    )
}

#[test]
fn pdf_text_is_extracted() {
    let parsed = parse_local(&minimal_pdf("free shipping wins"), FileFormat::Pdf).unwrap();
    assert_eq!(parsed.method, ExtractionMethod::PdfText);
    assert!(parsed.text.contains("shipping"), "got: {:?}", parsed.text);
    // Three words is far too sparse for a real document.
    assert_eq!(parsed.confidence, 0.5);
}

#[test]
fn docx_paragraphs_become_lines() {
    let bytes = docx(&["Free shipping lifts conversion", "Test the threshold"]);
    let parsed = parse_local(&bytes, FileFormat::Docx).unwrap();
    assert_eq!(parsed.method, ExtractionMethod::OfficeXml);
    assert_eq!(parsed.text, "Free shipping lifts conversion\nTest the threshold");
    assert_eq!(parsed.confidence, 0.95);
}

#[test]
fn pptx_slides_are_read_in_numeric_order() {
    let bytes = zip_with(&[
        ("ppt/slides/slide10.xml", slide("Tenth slide")),
        ("ppt/slides/slide2.xml", slide("Second slide")),
        ("ppt/slides/slide1.xml", slide("First slide")),
    ]);
    let parsed = parse_local(&bytes, FileFormat::Pptx).unwrap();
    assert_eq!(parsed.text, "First slide\n\nSecond slide\n\nTenth slide");
}

#[test]
fn xlsx_resolves_shared_strings() {
    let shared = "<?xml version=\"1.0\"?><sst><si><t>Channel</t></si><si><t>Meta</t></si></sst>";
    let sheet = "<?xml version=\"1.0\"?><worksheet><sheetData><row>\
                 <c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\"><v>42</v></c>\
                 <c r=\"C1\" t=\"s\"><v>1</v></c></row></sheetData></worksheet>";
    let bytes = zip_with(&[
        ("xl/sharedStrings.xml", shared.to_string()),
        ("xl/worksheets/sheet1.xml", sheet.to_string()),
    ]);
    let parsed = parse_local(&bytes, FileFormat::Xlsx).unwrap();
    assert_eq!(parsed.text, "Channel 42 Meta");
}

#[test]
fn corrupt_office_file_is_an_error() {
    let err = parse_local(b"not a zip", FileFormat::Docx).unwrap_err();
    assert!(matches!(err, ParseError::Ooxml(_)));
}

#[tokio::test]
async fn builtin_parser_runs_local_formats_off_thread() {
    let parser = BuiltinParser::new(Arc::new(DisabledLlm));
    let parsed = parser
        .parse(&docx(&["Bundle offers raise order value"]), FileFormat::Docx)
        .await
        .unwrap();
    assert_eq!(parsed.text, "Bundle offers raise order value");
}

#[tokio::test]
async fn images_need_a_transcriber() {
    let parser = BuiltinParser::new(Arc::new(DisabledLlm));
    let err = parser
        .parse(b"\x89PNG\r\n", FileFormat::Png)
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::Media(_)));
}
