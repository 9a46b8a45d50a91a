//! PDF rasterisation: render the first page to PNG via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! runtime's worker threads never stall during rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_pixels` caps the longest edge regardless of
//! physical size, keeping memory bounded per request.

use crate::tools::PdfiumLibrary;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Rasterise page 1 of `pdf` into a PNG at `output`; returns its dimensions.
///
/// Errors are plain strings: the caller turns them into a per-method
/// conversion failure and moves on to the next method.
pub fn render_first_page_blocking(
    library: &PdfiumLibrary,
    pdf: &Path,
    output: &Path,
    max_pixels: u32,
) -> Result<(u32, u32), String> {
    let pdfium = library.pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf, None)
        .map_err(|e| format!("pdfium could not open the PDF: {e:?}"))?;

    let pages = document.pages();
    if pages.len() == 0 {
        return Err("document has no pages".to_string());
    }
    let page = pages
        .get(0)
        .map_err(|e| format!("pdfium could not load page 1: {e:?}"))?;

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| format!("rasterisation failed for page 1: {e:?}"))?;

    let image = bitmap.as_image();
    debug!("Rendered page 1 → {}x{} px", image.width(), image.height());
    image
        .save_with_format(output, ImageFormat::Png)
        .map_err(|e| format!("failed to write PNG: {e}"))?;
    Ok((image.width(), image.height()))
}
