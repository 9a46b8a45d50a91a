//! Native readers for Office Open XML documents.
//!
//! `.docx` and `.xlsx` are zip archives of XML parts. These readers pull out
//! the text (paragraphs for Word, cell values for Excel) without any layout
//! information; good enough to produce a readable PDF when LibreOffice is not
//! installed. Legacy binary `.doc`/`.xls` are not handled here.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Why a document could not be read natively.
#[derive(Debug, Error)]
pub enum OfficeError {
    #[error("not a zip archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("missing part '{0}'")]
    MissingPart(String),

    #[error("malformed XML in '{part}': {detail}")]
    Xml { part: String, detail: String },

    #[error("'{part}' inflates past the {limit}-byte limit for native conversion")]
    TooLarge { part: String, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Most uncompressed XML read from one document, summed over all parts.
pub const MAX_XML_BYTES: u64 = 16 * 1024 * 1024;

/// An open package with a shared budget for inflated XML.
struct Package {
    archive: zip::ZipArchive<BufReader<File>>,
    remaining: u64,
    limit: u64,
}

impl Package {
    fn open(path: &Path, limit: u64) -> Result<Self, OfficeError> {
        Ok(Self {
            archive: zip::ZipArchive::new(BufReader::new(File::open(path)?))?,
            remaining: limit,
            limit,
        })
    }

    fn read_part(&mut self, name: &str) -> Result<String, OfficeError> {
        let too_large = || OfficeError::TooLarge {
            part: name.to_string(),
            limit: self.limit,
        };
        let part = self.archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => OfficeError::MissingPart(name.to_string()),
            other => OfficeError::Archive(other),
        })?;
        // The declared size is checked up front; `take` guards against a header that lies.
        if part.size() > self.remaining {
            return Err(too_large());
        }
        let mut xml = String::new();
        part.take(self.remaining.saturating_add(1)).read_to_string(&mut xml)?;
        let read = xml.len() as u64;
        if read > self.remaining {
            return Err(too_large());
        }
        self.remaining -= read;
        Ok(xml)
    }

    fn read_optional_part(&mut self, name: &str) -> Result<Option<String>, OfficeError> {
        match self.read_part(name) {
            Ok(xml) => Ok(Some(xml)),
            Err(OfficeError::MissingPart(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn xml_err(part: &str) -> impl Fn(quick_xml::Error) -> OfficeError + '_ {
    move |e| OfficeError::Xml {
        part: part.to_string(),
        detail: e.to_string(),
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.try_get_attribute(key)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ── Word ─────────────────────────────────────────────────────────────────

/// Paragraph texts of a `.docx`, in document order.
pub fn docx_paragraphs(path: &Path) -> Result<Vec<String>, OfficeError> {
    docx_paragraphs_within(path, MAX_XML_BYTES)
}

fn docx_paragraphs_within(path: &Path, limit: u64) -> Result<Vec<String>, OfficeError> {
    let mut package = Package::open(path, limit)?;
    let xml = package.read_part("word/document.xml")?;
    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &str) -> Result<Vec<String>, OfficeError> {
    let err = xml_err("word/document.xml");
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    // Text boxes nest whole paragraphs inside a run; the outer text waits here.
    let mut outer: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"p" => {
                    if depth > 0 {
                        outer.push(std::mem::take(&mut current));
                    }
                    depth += 1;
                    current.clear();
                }
                b"t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" if depth > 0 => current.push('\t'),
                b"br" | b"cr" if depth > 0 => current.push('\n'),
                // Self-closing paragraph: an empty line.
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(t) if in_text => {
                current.push_str(&t.unescape().map_err(&err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if depth > 0 => {
                    depth -= 1;
                    paragraphs.push(std::mem::take(&mut current));
                    current = outer.pop().unwrap_or_default();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

// ── Excel ────────────────────────────────────────────────────────────────

/// One worksheet's non-empty rows, each a list of cell display values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

/// All worksheets of an `.xlsx`, in workbook order.
pub fn xlsx_sheets(path: &Path) -> Result<Vec<Sheet>, OfficeError> {
    xlsx_sheets_within(path, MAX_XML_BYTES)
}

fn xlsx_sheets_within(path: &Path, limit: u64) -> Result<Vec<Sheet>, OfficeError> {
    let mut package = Package::open(path, limit)?;
    let shared = match package.read_optional_part("xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml)?,
        None => Vec::new(),
    };
    let workbook = package.read_part("xl/workbook.xml")?;
    let rels = package.read_part("xl/_rels/workbook.xml.rels")?;
    let targets = parse_relationships(&rels)?;

    let mut sheets = Vec::new();
    for (name, rel_id) in parse_workbook(&workbook)? {
        let Some(target) = targets.get(&rel_id) else {
            continue;
        };
        let part = resolve_target(target);
        let xml = package.read_part(&part)?;
        sheets.push(Sheet {
            name,
            rows: parse_sheet(&xml, &shared, &part)?,
        });
    }
    Ok(sheets)
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{target}"),
    }
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, OfficeError> {
    let err = xml_err("xl/sharedStrings.xml");
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    // Phonetic runs (`rPh`) repeat the text in another script.
    let mut in_phonetic = false;

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_text = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(t) if in_text && !in_phonetic => {
                current.push_str(&t.unescape().map_err(&err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"t" => in_text = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

fn parse_workbook(xml: &str) -> Result<Vec<(String, String)>, OfficeError> {
    let err = xml_err("xl/workbook.xml");
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(id)) = (attr(&e, "name"), attr(&e, "r:id")) {
                    sheets.push((name, id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<HashMap<String, String>, OfficeError> {
    let err = xml_err("xl/_rels/workbook.xml.rels");
    let mut reader = Reader::from_str(xml);
    let mut map = HashMap::new();
    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, "Id"), attr(&e, "Target")) {
                    map.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(map)
}

#[derive(Default)]
struct CellState {
    kind: Option<String>,
    column: Option<usize>,
    value: String,
    in_value: bool,
}

/// Widest sheet Excel allows (column `XFD`).
const MAX_COLUMNS: usize = 16_384;

/// Zero-based column of a cell reference such as `D7`.
fn column_index(reference: &str) -> Option<usize> {
    let letters = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase());
    let mut column = 0usize;
    let mut seen = false;
    for b in letters {
        column = column * 26 + usize::from(b - b'A' + 1);
        if column > MAX_COLUMNS {
            return None;
        }
        seen = true;
    }
    seen.then(|| column - 1)
}

fn place_cell(row: &mut Vec<String>, column: Option<usize>, value: String) {
    if let Some(column) = column {
        if column > row.len() {
            row.resize(column, String::new());
        }
    }
    row.push(value);
}

fn parse_sheet(xml: &str, shared: &[String], part: &str) -> Result<Vec<Vec<String>>, OfficeError> {
    let err = xml_err(part);
    let mut reader = Reader::from_str(xml);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut cell = CellState::default();

    loop {
        match reader.read_event().map_err(&err)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell = CellState {
                        kind: attr(&e, "t"),
                        column: attr(&e, "r").as_deref().and_then(column_index),
                        ..CellState::default()
                    }
                }
                // `<v>` for stored values, `<t>` inside `<is>` for inline strings.
                b"v" | b"t" => cell.in_value = true,
                _ => {}
            },
            Event::Text(t) if cell.in_value => {
                cell.value.push_str(&t.unescape().map_err(&err)?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => cell.in_value = false,
                b"c" => place_cell(&mut row, cell.column, display_value(&cell, shared)),
                b"row" => {
                    if row.iter().any(|v| !v.trim().is_empty()) {
                        rows.push(std::mem::take(&mut row));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rows)
}

fn display_value(cell: &CellState, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.value.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.value.clone(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn write_zip(path: &Path, parts: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in parts {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    pub(crate) const DOCUMENT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world &amp; more</w:t></w:r></w:p>
    <w:p/>
    <w:p><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn reads_docx_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        write_zip(&path, &[("word/document.xml", DOCUMENT_XML)]);
        assert_eq!(
            docx_paragraphs(&path).unwrap(),
            vec!["Hello world & more".to_string(), String::new(), "A\tB".to_string()]
        );
    }

    #[test]
    fn garbage_is_not_a_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.docx");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(matches!(docx_paragraphs(&path), Err(OfficeError::Archive(_))));
    }

    #[test]
    fn reads_xlsx_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.xlsx");
        write_zip(
            &path,
            &[
                (
                    "xl/workbook.xml",
                    r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Budget" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
                ),
                (
                    "xl/_rels/workbook.xml.rels",
                    r#"<Relationships><Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#,
                ),
                (
                    "xl/sharedStrings.xml",
                    r#"<sst><si><t>Item</t></si><si><r><t>Co</t></r><r><t>st</t></r></si></sst>"#,
                ),
                (
                    "xl/worksheets/sheet1.xml",
                    r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="inlineStr"><is><t>Rent</t></is></c><c r="B2"><v>1200.5</v></c><c r="C2" t="b"><v>1</v></c></row>
<row r="3"><c r="A3"/></row>
</sheetData></worksheet>"#,
                ),
            ],
        );
        let sheets = xlsx_sheets(&path).unwrap();
        assert_eq!(
            sheets,
            vec![Sheet {
                name: "Budget".into(),
                rows: vec![
                    vec!["Item".into(), "Cost".into()],
                    vec!["Rent".into(), "1200.5".into(), "TRUE".into()],
                ],
            }]
        );
    }

    #[test]
    fn relationship_targets_resolve_under_xl() {
        assert_eq!(resolve_target("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_target("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
    }

    #[test]
    fn oversized_part_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bomb.docx");
        let body = format!(
            "<w:document><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
            "a".repeat(64 * 1024)
        );
        write_zip(&path, &[("word/document.xml", body.as_str())]);

        match docx_paragraphs_within(&path, 4096) {
            Err(OfficeError::TooLarge { part, limit }) => {
                assert_eq!(part, "word/document.xml");
                assert_eq!(limit, 4096);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
        assert_eq!(docx_paragraphs(&path).unwrap()[0].len(), 64 * 1024);
    }

    #[test]
    fn budget_is_shared_across_parts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.xlsx");
        let filler = "x".repeat(600);
        let shared = format!("<sst><si><t>{filler}</t></si></sst>");
        let sheet = format!(
            r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>{filler}</t></is></c></row></sheetData></worksheet>"#
        );
        write_zip(
            &path,
            &[
                (
                    "xl/workbook.xml",
                    r#"<workbook><sheets><sheet name="S" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
                ),
                (
                    "xl/_rels/workbook.xml.rels",
                    r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/></Relationships>"#,
                ),
                ("xl/sharedStrings.xml", shared.as_str()),
                ("xl/worksheets/sheet1.xml", sheet.as_str()),
            ],
        );
        assert!(matches!(
            xlsx_sheets_within(&path, 1200),
            Err(OfficeError::TooLarge { part, .. }) if part == "xl/worksheets/sheet1.xml"
        ));
        assert_eq!(xlsx_sheets(&path).unwrap()[0].rows[0][0], filler);
    }

    #[test]
    fn text_box_paragraph_keeps_outer_text() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
<w:p><w:r><w:t>Before</w:t></w:r><w:r><w:txbxContent><w:p><w:r><w:t>Boxed</w:t></w:r></w:p></w:txbxContent></w:r><w:r><w:t> after</w:t></w:r></w:p>
</w:body></w:document>"#;
        assert_eq!(
            parse_document_xml(xml).unwrap(),
            vec!["Boxed".to_string(), "Before after".to_string()]
        );
    }

    #[test]
    fn sparse_cells_keep_their_columns() {
        let xml = r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="inlineStr"><is><t>left</t></is></c><c r="D1"><v>4</v></c></row>
<row r="2"><c r="B2"><v>2</v></c></row>
</sheetData></worksheet>"#;
        assert_eq!(
            parse_sheet(xml, &[], "sheet1.xml").unwrap(),
            vec![
                vec!["left".to_string(), String::new(), String::new(), "4".to_string()],
                vec![String::new(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn cell_references_map_to_columns() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("d7"), Some(3));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("XFD1"), Some(16_383));
        assert_eq!(column_index("XFE1"), None);
        assert_eq!(column_index("12"), None);
    }
}
