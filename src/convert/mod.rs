//! Document conversion through ordered fallback chains.
//!
//! ## Why a chain?
//!
//! Document conversion depends on engines that may not be installed
//! (LibreOffice, Ghostscript, pdfium). Rather than nesting `match` arms per
//! endpoint, each conversion is a list of [`ConversionMethod`]s tried in
//! order until one produces an artifact:
//!
//! ```text
//! Word/Excel → PDF : native (zip+xml) ──▶ libreoffice ──▶ placeholder
//! PDF → Image      : pdfium           ──▶ ghostscript ──▶ placeholder
//! ```
//!
//! A method whose capability is unavailable is skipped without being run,
//! and the reason is recorded. Each method is attempted at most once; there
//! are no retries. The placeholder is always last and always available, so a
//! chain only fails if even the placeholder cannot be written.

mod methods;

pub use methods::{Ghostscript, LibreOffice, NativeOffice, Placeholder, PdfiumRender};

use crate::error::{AttemptError, ToolifyError};
use crate::output::Artifact;
use crate::tools::Toolbox;
use crate::workspace::Upload;
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Response header naming the method that produced a converted artifact.
pub const METHOD_HEADER: &str = "x-conversion-method";

/// The document conversions the server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionKind {
    WordToPdf,
    ExcelToPdf,
    PdfToImage,
}

impl ConversionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ConversionKind::WordToPdf => "Word to PDF",
            ConversionKind::ExcelToPdf => "Excel to PDF",
            ConversionKind::PdfToImage => "PDF to Image",
        }
    }
}

/// Everything a method needs to convert one upload.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub kind: ConversionKind,
    pub input: Upload,
    /// Request workspace; methods write only inside it.
    pub workdir: PathBuf,
    /// Longest edge for rasterised output.
    pub render_max_pixels: u32,
}

/// One way of performing a conversion.
#[async_trait]
pub trait ConversionMethod: Send + Sync {
    /// Short identifier, reported in the `X-Conversion-Method` header.
    fn name(&self) -> &'static str;

    /// Whether the backing capability is present. Unavailable methods are
    /// skipped without calling [`ConversionMethod::attempt`].
    fn is_available(&self) -> bool {
        true
    }

    /// True for methods that produce a stand-in document rather than a
    /// conversion of the input.
    fn is_placeholder(&self) -> bool {
        false
    }

    /// Try the conversion once. `history` holds the failures of the methods
    /// tried before this one.
    async fn attempt(
        &self,
        job: &ConversionJob,
        history: &[AttemptError],
    ) -> Result<Artifact, AttemptError>;
}

/// Result of a successful chain run.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub artifact: Artifact,
    pub method: &'static str,
    pub placeholder: bool,
    /// Failures of the methods tried before the successful one.
    pub failures: Vec<AttemptError>,
}

/// An ordered list of conversion methods.
pub struct FallbackChain {
    methods: Vec<Box<dyn ConversionMethod>>,
}

impl FallbackChain {
    pub fn new(methods: Vec<Box<dyn ConversionMethod>>) -> Self {
        Self { methods }
    }

    /// The standard chain for `kind`.
    pub fn for_kind(kind: ConversionKind, toolbox: &Arc<Toolbox>) -> Self {
        let methods: Vec<Box<dyn ConversionMethod>> = match kind {
            ConversionKind::WordToPdf | ConversionKind::ExcelToPdf => vec![
                Box::new(NativeOffice),
                Box::new(LibreOffice::new(toolbox.clone())),
                Box::new(Placeholder),
            ],
            ConversionKind::PdfToImage => vec![
                Box::new(PdfiumRender::new(toolbox.clone())),
                Box::new(Ghostscript::new(toolbox.clone())),
                Box::new(Placeholder),
            ],
        };
        Self::new(methods)
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Run the chain until a method succeeds.
    pub async fn run(&self, job: &ConversionJob) -> Result<ConversionOutcome, ToolifyError> {
        let mut failures: Vec<AttemptError> = Vec::new();
        info!(
            "Converting '{}' ({})",
            job.input.original_name,
            job.kind.label()
        );

        for method in &self.methods {
            if !method.is_available() {
                debug!("Skipping {}: not available", method.name());
                failures.push(AttemptError::Unavailable {
                    method: method.name(),
                    reason: "not installed on this server".into(),
                });
                continue;
            }

            let started = Instant::now();
            let result = match method.attempt(job, &failures).await {
                Ok(artifact) => ensure_output(method.name(), artifact).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(artifact) => {
                    info!(
                        "{} succeeded via {} in {:.1}s{}",
                        job.kind.label(),
                        method.name(),
                        started.elapsed().as_secs_f64(),
                        if method.is_placeholder() { " (placeholder)" } else { "" }
                    );
                    return Ok(ConversionOutcome {
                        artifact,
                        method: method.name(),
                        placeholder: method.is_placeholder(),
                        failures,
                    });
                }
                Err(e) => {
                    warn!("{} attempt failed: {}", job.kind.label(), e);
                    failures.push(e);
                }
            }
        }

        Err(ToolifyError::ConversionExhausted {
            conversion: job.kind.label().to_string(),
            failures,
        })
    }
}

async fn ensure_output(method: &'static str, artifact: Artifact) -> Result<Artifact, AttemptError> {
    match tokio::fs::metadata(&artifact.path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(artifact),
        _ => Err(AttemptError::NoOutput { method }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        available: bool,
        succeed: bool,
        calls: Arc<AtomicUsize>,
        seen_history: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, available: bool, succeed: bool) -> Self {
            Self {
                name,
                available,
                succeed,
                calls: Arc::new(AtomicUsize::new(0)),
                seen_history: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl ConversionMethod for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn attempt(
            &self,
            job: &ConversionJob,
            history: &[AttemptError],
        ) -> Result<Artifact, AttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_history.store(history.len(), Ordering::SeqCst);
            if !self.succeed {
                return Err(AttemptError::failed(self.name, "scripted failure"));
            }
            let path = job.workdir.join(format!("{}.out", self.name));
            tokio::fs::write(&path, b"ok").await.unwrap();
            Ok(Artifact::pdf(path, "converted.pdf"))
        }
    }

    fn job(dir: &std::path::Path, kind: ConversionKind, input: &str) -> ConversionJob {
        let path = dir.join(input);
        if !path.exists() {
            std::fs::write(&path, b"not a real document").unwrap();
        }
        ConversionJob {
            kind,
            input: Upload {
                storage_name: input.into(),
                original_name: input.into(),
                content_type: "application/octet-stream".into(),
                size: 19,
                path,
            },
            workdir: dir.to_path_buf(),
            render_max_pixels: 500,
        }
    }

    #[tokio::test]
    async fn skips_unavailable_and_falls_through_failures() {
        let dir = tempfile::tempdir().unwrap();
        let skipped = Scripted::new("skipped", false, true);
        let failing = Scripted::new("failing", true, false);
        let winner = Scripted::new("winner", true, true);
        let never = Scripted::new("never", true, true);
        let (skipped_calls, winner_history, never_calls) = (
            skipped.calls.clone(),
            winner.seen_history.clone(),
            never.calls.clone(),
        );

        let chain = FallbackChain::new(vec![
            Box::new(skipped),
            Box::new(failing),
            Box::new(winner),
            Box::new(never),
        ]);
        let outcome = chain
            .run(&job(dir.path(), ConversionKind::WordToPdf, "a.docx"))
            .await
            .unwrap();

        assert_eq!(outcome.method, "winner");
        assert!(!outcome.placeholder);
        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(outcome.failures[0], AttemptError::Unavailable { method: "skipped", .. }));
        assert_eq!(skipped_calls.load(Ordering::SeqCst), 0);
        assert_eq!(winner_history.load(Ordering::SeqCst), 2);
        assert_eq!(never_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_reports_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let chain = FallbackChain::new(vec![
            Box::new(Scripted::new("one", true, false)),
            Box::new(Scripted::new("two", false, true)),
        ]);
        let err = chain
            .run(&job(dir.path(), ConversionKind::ExcelToPdf, "a.xlsx"))
            .await
            .unwrap_err();
        match err {
            ToolifyError::ConversionExhausted { failures, .. } => {
                assert_eq!(failures.iter().map(AttemptError::method).collect::<Vec<_>>(), vec!["one", "two"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn toolbox_without_tools() -> Arc<Toolbox> {
        let config = ServerConfig::builder()
            .pdfium_lib_path("/nonexistent/libpdfium.so")
            .soffice_bin("/nonexistent/soffice")
            .ghostscript_bin("/nonexistent/gs")
            .tesseract_bin("/nonexistent/tesseract")
            .build()
            .unwrap();
        Arc::new(Toolbox::from_config(&config))
    }

    #[tokio::test]
    async fn standard_chains_end_in_placeholder() {
        let tools = toolbox_without_tools();
        assert_eq!(
            FallbackChain::for_kind(ConversionKind::WordToPdf, &tools).method_names(),
            vec!["native", "libreoffice", "placeholder"]
        );
        assert_eq!(
            FallbackChain::for_kind(ConversionKind::PdfToImage, &tools).method_names(),
            vec!["pdfium", "ghostscript", "placeholder"]
        );

        let dir = tempfile::tempdir().unwrap();
        let outcome = FallbackChain::for_kind(ConversionKind::PdfToImage, &tools)
            .run(&job(dir.path(), ConversionKind::PdfToImage, "a.pdf"))
            .await
            .unwrap();
        assert!(outcome.placeholder);
        assert_eq!(outcome.artifact.download_name, "conversion-note.pdf");
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn real_docx_converts_natively() {
        let tools = toolbox_without_tools();
        let dir = tempfile::tempdir().unwrap();
        crate::pipeline::office::tests::write_zip(
            &dir.path().join("memo.docx"),
            &[("word/document.xml", crate::pipeline::office::tests::DOCUMENT_XML)],
        );
        let outcome = FallbackChain::for_kind(ConversionKind::WordToPdf, &tools)
            .run(&job(dir.path(), ConversionKind::WordToPdf, "memo.docx"))
            .await
            .unwrap();
        assert_eq!(outcome.method, "native");
        assert!(outcome.failures.is_empty());
        let pdf = lopdf::Document::load(&outcome.artifact.path).unwrap();
        assert_eq!(pdf.get_pages().len(), 1);
    }

    #[tokio::test]
    async fn garbage_docx_gets_placeholder() {
        let tools = toolbox_without_tools();
        let dir = tempfile::tempdir().unwrap();
        let outcome = FallbackChain::for_kind(ConversionKind::WordToPdf, &tools)
            .run(&job(dir.path(), ConversionKind::WordToPdf, "broken.docx"))
            .await
            .unwrap();
        assert_eq!(outcome.method, "placeholder");
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.artifact.download_name, "converted.pdf");
    }
}
