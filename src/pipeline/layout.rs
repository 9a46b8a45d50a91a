//! Minimal text-to-PDF layout: wrapped lines of Helvetica on fixed pages.
//!
//! Used by the native office converters and by the placeholder document.
//! Text is encoded as WinAnsi; characters outside Latin-1 print as `?`.

use super::pdf::{add_page, rebuild_page_tree, save_document, A4};
use crate::error::ToolifyError;
use lopdf::{dictionary, Document};
use std::fmt::Write as _;
use std::path::Path;

const MARGIN: f32 = 50.0;

/// Average Helvetica glyph width as a fraction of the font size; good enough
/// to wrap without font metrics.
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// A single laid-out line.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub size: f32,
}

/// Builder for a simple flowing text document.
#[derive(Debug, Clone)]
pub struct TextDocument {
    page: (f32, f32),
    lines: Vec<Line>,
}

impl Default for TextDocument {
    fn default() -> Self {
        Self::new(A4)
    }
}

impl TextDocument {
    pub fn new(page: (f32, f32)) -> Self {
        Self {
            page,
            lines: Vec::new(),
        }
    }

    fn max_chars(&self, size: f32) -> usize {
        (((self.page.0 - 2.0 * MARGIN) / (size * AVG_GLYPH_WIDTH)) as usize).max(10)
    }

    pub fn heading(&mut self, text: &str) -> &mut Self {
        self.lines.push(Line {
            text: text.to_string(),
            size: 14.0,
        });
        self
    }

    /// Add a paragraph, wrapped to the page width. An empty paragraph
    /// becomes a blank line.
    pub fn paragraph(&mut self, text: &str) -> &mut Self {
        self.push_wrapped(text, 11.0)
    }

    pub fn push_wrapped(&mut self, text: &str, size: f32) -> &mut Self {
        let width = self.max_chars(size);
        let expanded = text.replace('\t', "    ");
        let mut any = false;
        for raw in expanded.split('\n') {
            for line in wrap(raw, width) {
                self.lines.push(Line { text: line, size });
                any = true;
            }
        }
        if !any {
            self.lines.push(Line {
                text: String::new(),
                size,
            });
        }
        self
    }

    pub fn blank(&mut self) -> &mut Self {
        self.lines.push(Line {
            text: String::new(),
            size: 11.0,
        });
        self
    }

    /// Paginate and write the document. Always produces at least one page.
    pub fn write(&self, output: &Path) -> Result<usize, ToolifyError> {
        let mut doc = Document::with_version("1.5");
        let font_id = doc.add_object(helvetica());
        let mut page_ids = Vec::new();

        let top = self.page.1 - MARGIN;
        let mut content = String::new();
        let mut y = top;
        for line in &self.lines {
            let leading = line.size * 1.3;
            if y - leading < MARGIN && !content.is_empty() {
                page_ids.push(self.finish_page(&mut doc, font_id, std::mem::take(&mut content)));
                y = top;
            }
            y -= leading;
            if !line.text.is_empty() {
                show_text(&mut content, &line.text, line.size, MARGIN, y);
            }
        }
        page_ids.push(self.finish_page(&mut doc, font_id, content));

        rebuild_page_tree(&mut doc, &page_ids);
        save_document(&mut doc, output)?;
        Ok(page_ids.len())
    }

    fn finish_page(&self, doc: &mut Document, font_id: lopdf::ObjectId, content: String) -> lopdf::ObjectId {
        let resources = dictionary! { "Font" => dictionary! { "F1" => font_id } };
        add_page(doc, self.page, content.into_bytes(), resources)
    }
}

/// Absolutely positioned lines on a single page, for fixed-layout notes.
pub fn write_positioned(
    page: (f32, f32),
    lines: &[(f32, f32, f32, String)],
    output: &Path,
) -> Result<(), ToolifyError> {
    let mut doc = Document::with_version("1.5");
    let font_id = doc.add_object(helvetica());
    let mut content = String::new();
    for (x, y, size, text) in lines {
        show_text(&mut content, text, *size, *x, *y);
    }
    let resources = dictionary! { "Font" => dictionary! { "F1" => font_id } };
    let page_id = add_page(&mut doc, page, content.into_bytes(), resources);
    rebuild_page_tree(&mut doc, &[page_id]);
    save_document(&mut doc, output)
}

fn helvetica() -> lopdf::Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

fn show_text(content: &mut String, text: &str, size: f32, x: f32, y: f32) {
    let _ = writeln!(
        content,
        "BT /F1 {size:.1} Tf {x:.2} {y:.2} Td ({}) Tj ET",
        escape_pdf_string(text)
    );
}

/// Escape for a PDF literal string; Latin-1 as octal, anything else as `?`.
pub fn escape_pdf_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' | '(' | ')' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{a0}'..='\u{ff}' => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            _ => out.push('?'),
        }
    }
    out
}

/// Greedy word wrap at `width` characters; words longer than a line are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            lines.push(word.drain(..width).collect());
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width && current_len > 0 {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if word.is_empty() {
            continue;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(word.iter());
        current_len += word.len();
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_respects_width() {
        assert_eq!(wrap("the quick brown fox", 9), vec!["the quick", "brown fox"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap("   ", 10).is_empty());
    }

    #[test]
    fn escape_handles_delimiters_and_latin1() {
        assert_eq!(escape_pdf_string(r"a(b)\c"), r"a\(b\)\\c");
        assert_eq!(escape_pdf_string("café"), "caf\\351");
        assert_eq!(escape_pdf_string("日本"), "??");
    }

    #[test]
    fn long_text_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("long.pdf");
        let mut doc = TextDocument::default();
        for i in 0..200 {
            doc.paragraph(&format!("Line number {i}"));
        }
        let pages = doc.write(&out).unwrap();
        assert!(pages >= 3, "got {pages} pages");
        assert_eq!(Document::load(&out).unwrap().get_pages().len(), pages);
    }

    #[test]
    fn empty_document_has_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.pdf");
        assert_eq!(TextDocument::default().write(&out).unwrap(), 1);
    }
}
