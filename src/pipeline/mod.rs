//! Transform adapters.
//!
//! Each submodule wraps exactly one library or engine and exposes plain
//! functions over paths inside a request workspace. Handlers call them
//! directly; document conversions reach them through
//! [`crate::convert::FallbackChain`].
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ pdf / imaging / office / render / ocr ──▶ (layout) ──▶ (archive) ──▶ artifact
//!            (lopdf) (image) (zip+xml) (pdfium) (tesseract)  (text→PDF)    (zip)
//! ```
//!
//! 1. [`pdf`]:      merge, split and image-to-PDF on the PDF object model
//! 2. [`imaging`]:  decode, JPEG compression and format conversion
//! 3. [`office`]:   text extraction from `.docx` and `.xlsx`
//! 4. [`render`]:   first-page rasterisation; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 5. [`ocr`]:      per-request tesseract sessions
//! 6. [`layout`]:   flowing and fixed text pages rendered as PDF
//! 7. [`archive`]:  zip packaging when a transform yields several files

pub mod archive;
pub mod imaging;
pub mod layout;
pub mod ocr;
pub mod office;
pub mod pdf;
pub mod render;
