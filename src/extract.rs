//! Structured text extraction for Word (`.docx`) and plain-text documents.
//!
//! Returns paragraphs tagged with their heading level plus any tables found,
//! leaving it to [`crate::documents`] to assemble sections and raw text.
//! Extraction never panics; malformed input yields an [`ExtractError`] and
//! the loader skips the file.

use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use crate::models::Table;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY_ENTRY: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8")]
    InvalidUtf8,
}

/// Input formats the loader understands, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Docx,
    Markdown,
    PlainText,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "docx" => Some(SourceKind::Docx),
            "md" | "markdown" => Some(SourceKind::Markdown),
            "txt" => Some(SourceKind::PlainText),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParagraphKind {
    Title,
    Heading(u8),
    Body,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub kind: ParagraphKind,
    pub text: String,
}

/// Raw extraction result, in document order.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub paragraphs: Vec<Paragraph>,
    pub tables: Vec<Table>,
}

pub fn extract(bytes: &[u8], kind: SourceKind) -> Result<Extracted, ExtractError> {
    match kind {
        SourceKind::Docx => extract_docx(bytes),
        SourceKind::Markdown | SourceKind::PlainText => {
            let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::InvalidUtf8)?;
            Ok(extract_markdown(text))
        }
    }
}

/// Extracts from a file path, picking the format by extension.
pub fn extract_path(path: &Path, bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let kind = SourceKind::from_path(path)
        .ok_or_else(|| ExtractError::UnsupportedFileType(path.display().to_string()))?;
    extract(bytes, kind)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<Extracted, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY_ENTRY, MAX_XML_ENTRY_BYTES)?;
    parse_document_xml(&xml)
}

/// Paragraph under construction. Paragraphs nested inside it (text boxes)
/// add their text to it and do not end it.
#[derive(Default)]
struct ParagraphBuf {
    depth: usize,
    style: Option<String>,
    text: String,
}

impl ParagraphBuf {
    fn separate(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with(char::is_whitespace) {
            self.text.push(' ');
        }
    }
}

/// Table under construction. Only the outermost table keeps its own
/// structure; nested tables fold into the enclosing cell.
#[derive(Default)]
struct TableBuf {
    depth: usize,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: String,
}

impl TableBuf {
    fn push_cell_text(&mut self, text: &str) {
        if !self.cell.is_empty() {
            self.cell.push(' ');
        }
        self.cell.push_str(text);
    }
}

fn parse_document_xml(xml: &[u8]) -> Result<Extracted, ExtractError> {
    let mut out = Extracted::default();
    // Whitespace is significant: adjacent runs such as "Funnel " + "de ventas".
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut para: Option<ParagraphBuf> = None;
    let mut table = TableBuf::default();
    let mut run_depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => {
                    let p = para.get_or_insert_with(ParagraphBuf::default);
                    if p.depth > 0 {
                        p.separate();
                    }
                    p.depth += 1;
                }
                b"r" => run_depth += 1,
                b"t" => in_text = run_depth > 0,
                b"pStyle" => set_style(&mut para, &e),
                b"tbl" => {
                    table.depth += 1;
                    if table.depth == 1 {
                        table.rows.clear();
                    }
                }
                b"tr" if table.depth == 1 => table.row.clear(),
                b"tc" if table.depth == 1 => table.cell.clear(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"pStyle" => set_style(&mut para, &e),
                b"tab" if run_depth > 0 => push_para_char(&mut para, '\t'),
                b"br" | b"cr" if run_depth > 0 => push_para_char(&mut para, '\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                if let Some(p) = para.as_mut() {
                    p.text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => run_depth = run_depth.saturating_sub(1),
                b"p" if para.as_ref().is_some_and(|p| p.depth > 1) => {
                    if let Some(p) = para.as_mut() {
                        p.depth -= 1;
                        p.separate();
                    }
                }
                b"p" => {
                    if let Some(p) = para.take() {
                        let text = p.text.trim();
                        if text.is_empty() {
                            // nothing to keep
                        } else if table.depth > 0 {
                            table.push_cell_text(text);
                        } else {
                            out.paragraphs.push(Paragraph {
                                kind: classify_style(p.style.as_deref()),
                                text: text.to_string(),
                            });
                        }
                    }
                }
                b"tc" if table.depth == 1 => {
                    let cell = std::mem::take(&mut table.cell);
                    table.row.push(cell.trim().to_string());
                }
                b"tr" if table.depth == 1 => {
                    let row = std::mem::take(&mut table.row);
                    table.rows.push(row);
                }
                b"tbl" => {
                    if table.depth == 1 {
                        let rows = std::mem::take(&mut table.rows);
                        if let Some(t) = build_table(rows) {
                            out.tables.push(t);
                        }
                    }
                    table.depth = table.depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

fn set_style(para: &mut Option<ParagraphBuf>, e: &BytesStart<'_>) {
    let Some(p) = para.as_mut().filter(|p| p.depth == 1) else {
        return;
    };
    p.style = e
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"val")
        .and_then(|a| a.unescape_value().ok())
        .map(|v| v.into_owned());
}

fn push_para_char(para: &mut Option<ParagraphBuf>, c: char) {
    if let Some(p) = para.as_mut() {
        p.text.push(c);
    }
}

/// Maps a Word style id to a paragraph kind. Spanish Word installs write
/// heading style ids as `Ttulo1`, `Ttulo2`, ... and the title as `Ttulo`.
pub fn classify_style(style: Option<&str>) -> ParagraphKind {
    let Some(style) = style else {
        return ParagraphKind::Body;
    };
    let lower: String = style
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();

    if matches!(lower.as_str(), "title" | "ttulo" | "titulo" | "título") {
        return ParagraphKind::Title;
    }
    for prefix in ["heading", "ttulo", "titulo", "título"] {
        if let Some(level) = lower
            .strip_prefix(prefix)
            .and_then(|rest| rest.parse::<u8>().ok())
        {
            return ParagraphKind::Heading(level);
        }
    }
    ParagraphKind::Body
}

/// Uses the first row as headers and drops rows whose cells are all empty.
fn build_table(mut rows: Vec<Vec<String>>) -> Option<Table> {
    if rows.is_empty() {
        return None;
    }
    let headers = rows.remove(0);
    let rows = rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    Some(Table { headers, rows })
}

fn extract_markdown(text: &str) -> Extracted {
    let mut out = Extracted::default();
    let mut table_rows: Vec<Vec<String>> = Vec::new();
    let mut seen_heading = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('|') {
            if !is_separator_row(trimmed) {
                table_rows.push(split_pipe_row(trimmed));
            }
            continue;
        }
        if !table_rows.is_empty() {
            if let Some(t) = build_table(std::mem::take(&mut table_rows)) {
                out.tables.push(t);
            }
        }
        if trimmed.is_empty() {
            continue;
        }

        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if hashes > 0 && trimmed[hashes..].starts_with(' ') {
            let heading = trimmed[hashes..].trim().to_string();
            let kind = if !seen_heading && hashes == 1 {
                ParagraphKind::Title
            } else {
                ParagraphKind::Heading(hashes.min(u8::MAX as usize) as u8)
            };
            seen_heading = true;
            out.paragraphs.push(Paragraph {
                kind,
                text: heading,
            });
        } else {
            out.paragraphs.push(Paragraph {
                kind: ParagraphKind::Body,
                text: trimmed.to_string(),
            });
        }
    }
    if let Some(t) = build_table(table_rows) {
        out.tables.push(t);
    }
    out
}

fn split_pipe_row(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn is_separator_row(line: &str) -> bool {
    line.chars()
        .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docx_with_body(body: &str) -> Vec<u8> {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCX_BODY_ENTRY, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    fn styled(style: &str, text: &str) -> String {
        format!(
            "<w:p><w:pPr><w:pStyle w:val=\"{}\"/></w:pPr><w:r><w:t>{}</w:t></w:r></w:p>",
            style, text
        )
    }

    fn plain(text: &str) -> String {
        format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
    }

    #[test]
    fn docx_paragraph_kinds() {
        let body = format!(
            "{}{}{}",
            styled("Title", "Funnel de Ventas"),
            styled("Heading1", "KPIs"),
            plain("Conversion de leads a ventas.")
        );
        let out = extract(&docx_with_body(&body), SourceKind::Docx).unwrap();
        assert_eq!(
            out.paragraphs,
            vec![
                Paragraph {
                    kind: ParagraphKind::Title,
                    text: "Funnel de Ventas".into()
                },
                Paragraph {
                    kind: ParagraphKind::Heading(1),
                    text: "KPIs".into()
                },
                Paragraph {
                    kind: ParagraphKind::Body,
                    text: "Conversion de leads a ventas.".into()
                },
            ]
        );
    }

    #[test]
    fn docx_joins_runs_without_losing_spaces() {
        let body = "<w:p><w:r><w:t xml:space=\"preserve\">Funnel </w:t></w:r><w:r><w:t>de compras</w:t></w:r></w:p>";
        let out = extract(&docx_with_body(body), SourceKind::Docx).unwrap();
        assert_eq!(out.paragraphs[0].text, "Funnel de compras");
    }

    #[test]
    fn docx_tab_stops_in_properties_are_not_text() {
        let body = "<w:p><w:pPr><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t></w:r></w:p>";
        let out = extract(&docx_with_body(body), SourceKind::Docx).unwrap();
        assert_eq!(out.paragraphs[0].text, "A\tB");
    }

    #[test]
    fn docx_tables_use_first_row_as_headers() {
        let cell = |t: &str| format!("<w:tc>{}</w:tc>", plain(t));
        let row = |cells: &[&str]| {
            format!(
                "<w:tr>{}</w:tr>",
                cells.iter().map(|c| cell(c)).collect::<String>()
            )
        };
        let body = format!(
            "<w:tbl>{}{}{}</w:tbl>",
            row(&["KPI", "Definicion"]),
            row(&["", ""]),
            row(&["Leads", "Prospectos calificados"])
        );
        let out = extract(&docx_with_body(&body), SourceKind::Docx).unwrap();
        assert!(out.paragraphs.is_empty());
        assert_eq!(
            out.tables,
            vec![Table {
                headers: vec!["KPI".into(), "Definicion".into()],
                rows: vec![vec!["Leads".into(), "Prospectos calificados".into()]],
            }]
        );
    }

    #[test]
    fn docx_text_box_does_not_end_enclosing_paragraph() {
        let body = "<w:p><w:pPr><w:pStyle w:val=\"Heading2\"/></w:pPr>\
            <w:r><w:t>Antes</w:t></w:r>\
            <w:r><w:pict><w:txbxContent>\
            <w:p><w:pPr><w:pStyle w:val=\"Title\"/></w:pPr><w:r><w:t>Caja</w:t></w:r></w:p>\
            </w:txbxContent></w:pict></w:r>\
            <w:r><w:t>Después</w:t></w:r></w:p>";
        let out = extract(&docx_with_body(body), SourceKind::Docx).unwrap();
        assert_eq!(
            out.paragraphs,
            vec![Paragraph {
                kind: ParagraphKind::Heading(2),
                text: "Antes Caja Después".into()
            }]
        );
    }

    #[test]
    fn docx_escaped_text_is_unescaped() {
        let out = extract(&docx_with_body(&plain("ventas &amp; compras")), SourceKind::Docx).unwrap();
        assert_eq!(out.paragraphs[0].text, "ventas & compras");
    }

    #[test]
    fn invalid_zip_returns_error() {
        let err = extract(b"not a zip", SourceKind::Docx).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_without_body_entry_returns_error() {
        use std::io::Write;
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract(&buf, SourceKind::Docx).unwrap_err();
        assert!(err.to_string().contains(DOCX_BODY_ENTRY));
    }

    #[test]
    fn classify_spanish_styles() {
        assert_eq!(classify_style(Some("Ttulo1")), ParagraphKind::Heading(1));
        assert_eq!(classify_style(Some("Ttulo")), ParagraphKind::Title);
        assert_eq!(classify_style(Some("Heading 2")), ParagraphKind::Heading(2));
        assert_eq!(classify_style(Some("Subtitle")), ParagraphKind::Body);
        assert_eq!(classify_style(None), ParagraphKind::Body);
    }

    #[test]
    fn markdown_headings_and_tables() {
        let text = "# Compras MX\n\nIntro.\n\n## Funnel\nEtapas del funnel.\n\n| KPI | Meta |\n|---|---|\n| Inspecciones | 100 |\n";
        let out = extract(text.as_bytes(), SourceKind::Markdown).unwrap();
        let kinds: Vec<ParagraphKind> = out.paragraphs.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ParagraphKind::Title,
                ParagraphKind::Body,
                ParagraphKind::Heading(2),
                ParagraphKind::Body
            ]
        );
        assert_eq!(out.tables.len(), 1);
        assert_eq!(out.tables[0].headers, vec!["KPI", "Meta"]);
        assert_eq!(out.tables[0].rows, vec![vec!["Inspecciones", "100"]]);
    }

    #[test]
    fn source_kind_by_extension() {
        assert_eq!(
            SourceKind::from_path(Path::new("a/Ventas.DOCX")),
            Some(SourceKind::Docx)
        );
        assert_eq!(SourceKind::from_path(Path::new("x.md")), Some(SourceKind::Markdown));
        assert_eq!(SourceKind::from_path(Path::new("x.pdf")), None);
    }
}
