//! The concrete conversion methods used by the standard chains.

use super::{ConversionJob, ConversionKind, ConversionMethod};
use crate::error::AttemptError;
use crate::output::Artifact;
use crate::pipeline::layout::{self, TextDocument};
use crate::pipeline::{office, render};
use crate::tools::{Capability, Toolbox};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

async fn blocking<T, F>(method: &'static str, f: F) -> Result<T, AttemptError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AttemptError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AttemptError::failed(method, format!("task panicked: {e}")))?
}

fn output_dir(job: &ConversionJob, method: &'static str, name: &str) -> Result<PathBuf, AttemptError> {
    let dir = job.workdir.join(name);
    std::fs::create_dir_all(&dir).map_err(|e| AttemptError::failed(method, e))?;
    Ok(dir)
}

// ── native ───────────────────────────────────────────────────────────────

/// Reads `.docx`/`.xlsx` text directly and lays it out as PDF pages.
#[derive(Debug, Default)]
pub struct NativeOffice;

impl NativeOffice {
    const NAME: &'static str = "native";

    fn convert_blocking(kind: ConversionKind, input: &Path, ext: &str, output: &Path) -> Result<(), AttemptError> {
        let mut doc = TextDocument::default();
        match (kind, ext) {
            (ConversionKind::WordToPdf, "docx") => {
                let paragraphs =
                    office::docx_paragraphs(input).map_err(|e| AttemptError::failed(Self::NAME, e))?;
                debug!("Read {} paragraphs", paragraphs.len());
                for p in &paragraphs {
                    doc.paragraph(p);
                }
            }
            (ConversionKind::ExcelToPdf, "xlsx") => {
                let sheets = office::xlsx_sheets(input).map_err(|e| AttemptError::failed(Self::NAME, e))?;
                debug!("Read {} sheets", sheets.len());
                for (i, sheet) in sheets.iter().enumerate() {
                    if i > 0 {
                        doc.blank();
                    }
                    doc.heading(&sheet.name);
                    for row in &sheet.rows {
                        doc.paragraph(&row.join("  |  "));
                    }
                }
            }
            (_, other) => {
                return Err(AttemptError::Unsupported {
                    method: Self::NAME,
                    reason: format!("'.{other}' files need an office suite"),
                })
            }
        }
        doc.write(output)
            .map(|_| ())
            .map_err(|e| AttemptError::failed(Self::NAME, e))
    }
}

#[async_trait]
impl ConversionMethod for NativeOffice {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn attempt(&self, job: &ConversionJob, _history: &[AttemptError]) -> Result<Artifact, AttemptError> {
        let ext = job.input.extension().unwrap_or_default();
        let (kind, input) = (job.kind, job.input.path.clone());
        let output = output_dir(job, Self::NAME, "native-out")?.join("converted.pdf");
        let target = output.clone();
        blocking(Self::NAME, move || Self::convert_blocking(kind, &input, &ext, &target)).await?;
        Ok(Artifact::pdf(output, "converted.pdf"))
    }
}

// ── libreoffice ──────────────────────────────────────────────────────────

/// `soffice --headless --convert-to pdf`.
pub struct LibreOffice {
    toolbox: Arc<Toolbox>,
}

impl LibreOffice {
    const NAME: &'static str = "libreoffice";

    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl ConversionMethod for LibreOffice {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.toolbox.libreoffice.is_available()
    }

    async fn attempt(&self, job: &ConversionJob, _history: &[AttemptError]) -> Result<Artifact, AttemptError> {
        let outdir = output_dir(job, Self::NAME, "libreoffice-out")?;
        let profile = output_dir(job, Self::NAME, "libreoffice-profile")?;
        // A private profile lets concurrent conversions run side by side.
        let profile = std::path::absolute(&profile).map_err(|e| AttemptError::failed(Self::NAME, e))?;

        let mut installation = OsString::from("-env:UserInstallation=file://");
        installation.push(profile.as_os_str());
        let args: Vec<OsString> = vec![
            installation,
            "--headless".into(),
            "--norestore".into(),
            "--convert-to".into(),
            "pdf".into(),
            "--outdir".into(),
            outdir.clone().into_os_string(),
            job.input.path.clone().into_os_string(),
        ];
        self.toolbox.libreoffice.run(args, Some(&job.workdir)).await?;

        let produced = first_with_extension(&outdir, "pdf")
            .await
            .ok_or(AttemptError::NoOutput { method: Self::NAME })?;
        Ok(Artifact::pdf(produced, "converted.pdf"))
    }
}

async fn first_with_extension(dir: &Path, ext: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        {
            return Some(path);
        }
    }
    None
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Rasterises page 1 with the pdfium library.
pub struct PdfiumRender {
    toolbox: Arc<Toolbox>,
}

impl PdfiumRender {
    const NAME: &'static str = "pdfium";

    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl ConversionMethod for PdfiumRender {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.toolbox.pdfium.is_available()
    }

    async fn attempt(&self, job: &ConversionJob, _history: &[AttemptError]) -> Result<Artifact, AttemptError> {
        let output = output_dir(job, Self::NAME, "pdfium-out")?.join("page-1.png");
        let (toolbox, input, target, max_pixels) = (
            self.toolbox.clone(),
            job.input.path.clone(),
            output.clone(),
            job.render_max_pixels,
        );
        blocking(Self::NAME, move || {
            render::render_first_page_blocking(&toolbox.pdfium, &input, &target, max_pixels)
                .map_err(|e| AttemptError::failed(Self::NAME, e))
        })
        .await?;
        Ok(Artifact::new(output, "converted.png", "image/png"))
    }
}

// ── ghostscript ──────────────────────────────────────────────────────────

/// `gs -sDEVICE=png16m -r300` on page 1.
pub struct Ghostscript {
    toolbox: Arc<Toolbox>,
}

impl Ghostscript {
    const NAME: &'static str = "ghostscript";

    pub fn new(toolbox: Arc<Toolbox>) -> Self {
        Self { toolbox }
    }
}

#[async_trait]
impl ConversionMethod for Ghostscript {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.toolbox.ghostscript.is_available()
    }

    async fn attempt(&self, job: &ConversionJob, _history: &[AttemptError]) -> Result<Artifact, AttemptError> {
        let output = output_dir(job, Self::NAME, "ghostscript-out")?.join("page-1.png");
        let args: Vec<OsString> = vec![
            "-dSAFER".into(),
            "-dBATCH".into(),
            "-dNOPAUSE".into(),
            "-q".into(),
            "-sDEVICE=png16m".into(),
            "-dTextAlphaBits=4".into(),
            "-dGraphicsAlphaBits=4".into(),
            "-r300".into(),
            "-dFirstPage=1".into(),
            "-dLastPage=1".into(),
            "-o".into(),
            output.clone().into_os_string(),
            job.input.path.clone().into_os_string(),
        ];
        self.toolbox.ghostscript.run(args, Some(&job.workdir)).await?;
        Ok(Artifact::new(output, "converted.png", "image/png"))
    }
}

// ── placeholder ──────────────────────────────────────────────────────────

/// Writes a one-page note explaining that the conversion was not possible.
#[derive(Debug, Default)]
pub struct Placeholder;

impl Placeholder {
    const NAME: &'static str = "placeholder";
    const PAGE: (f32, f32) = (600.0, 800.0);

    fn texts(kind: ConversionKind) -> (&'static str, &'static str, &'static str) {
        match kind {
            ConversionKind::WordToPdf => (
                "Document Conversion Placeholder",
                "This document could not be converted on this server.",
                "Install LibreOffice on the server for full Word to PDF conversion.",
            ),
            ConversionKind::ExcelToPdf => (
                "Excel to PDF Conversion Placeholder",
                "This spreadsheet could not be converted on this server.",
                "For production use, install LibreOffice or use a conversion API",
            ),
            ConversionKind::PdfToImage => (
                "PDF to Image Conversion",
                "The first page of this PDF could not be rendered to an image.",
                "Install Ghostscript or the pdfium library on the server to enable rendering.",
            ),
        }
    }

    fn lines(job: &ConversionJob, history: &[AttemptError]) -> Vec<(f32, f32, f32, String)> {
        let (title, message, hint) = Self::texts(job.kind);
        let mut lines = vec![
            (50.0, 700.0, 20.0, title.to_string()),
            (50.0, 650.0, 12.0, format!("Original file: {}", job.input.original_name)),
            (50.0, 600.0, 12.0, message.to_string()),
            (50.0, 570.0, 12.0, hint.to_string()),
        ];
        if history.is_empty() {
            return lines;
        }
        let mut y = 530.0;
        lines.push((50.0, y, 11.0, "Conversion attempts:".to_string()));
        'outer: for failure in history {
            for (i, text) in layout::wrap(&failure.to_string(), 95).into_iter().enumerate() {
                y -= 16.0;
                if y < 50.0 {
                    break 'outer;
                }
                let x = if i == 0 { 60.0 } else { 72.0 };
                let text = if i == 0 { format!("- {text}") } else { text };
                lines.push((x, y, 10.0, text));
            }
        }
        lines
    }
}

#[async_trait]
impl ConversionMethod for Placeholder {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_placeholder(&self) -> bool {
        true
    }

    async fn attempt(&self, job: &ConversionJob, history: &[AttemptError]) -> Result<Artifact, AttemptError> {
        let output = output_dir(job, Self::NAME, "placeholder-out")?.join("placeholder.pdf");
        let lines = Self::lines(job, history);
        let target = output.clone();
        blocking(Self::NAME, move || {
            layout::write_positioned(Self::PAGE, &lines, &target)
                .map_err(|e| AttemptError::failed(Self::NAME, e))
        })
        .await?;
        let download = match job.kind {
            ConversionKind::PdfToImage => "conversion-note.pdf",
            _ => "converted.pdf",
        };
        Ok(Artifact::pdf(output, download))
    }
}
