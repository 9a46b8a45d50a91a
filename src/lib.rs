//! # toolify
//!
//! A document-processing web service: merge and split PDFs, compress and
//! convert images, turn images, Word and Excel files into PDF, render PDF
//! pages to images and extract text with OCR.
//!
//! ## Request Lifecycle
//!
//! ```text
//! multipart upload
//!  │
//!  ├─ 1. Intake     validate type/count, stream each part into a per-request
//!  │                workspace with the size limit enforced while writing
//!  ├─ 2. Transform  lopdf / image / zip+xml in spawn_blocking, or a CLI tool
//!  │                (libreoffice, ghostscript, tesseract) under a timeout
//!  ├─ 3. Fallback   document conversions walk native → CLI → placeholder
//!  └─ 4. Download   stream the artifact; the workspace is deleted when the
//!                   response body is dropped
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use toolify::{serve, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder().port(5000).build()?;
//!     serve(config).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `toolify` binary (clap + anyhow + tracing-subscriber) |
//!
//! Optional engines are detected at startup and reported by `GET /api/health`.
//! Missing ones degrade document conversion to the next method in its chain.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod server;
pub mod tools;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use api::{router, AppState};
pub use config::{
    Environment, OcrLanguage, PageRange, Quality, ServerConfig, ServerConfigBuilder, SplitMode,
    TargetFormat,
};
pub use convert::{ConversionKind, ConversionMethod, FallbackChain, METHOD_HEADER};
pub use error::{AttemptError, ToolifyError};
pub use output::Artifact;
pub use server::serve;
pub use tools::{Capability, CapabilityReport, Toolbox};
