//! Image codec transforms: decode, JPEG compression and format conversion.
//!
//! Compression always re-encodes as JPEG; PNG and WebP from the `image`
//! crate are lossless and have no quality knob, so honouring a quality
//! setting means changing the format. Alpha is dropped when targeting JPEG.

use crate::config::{Quality, TargetFormat};
use crate::error::ToolifyError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Quality used when converting to JPEG.
const CONVERT_JPEG_QUALITY: u8 = 90;

/// Decode an image, sniffing the format from its bytes rather than its name.
pub fn decode(path: &Path, name: &str) -> Result<DynamicImage, ToolifyError> {
    let invalid = |detail: String| ToolifyError::InvalidImage {
        name: name.to_string(),
        detail,
    };
    ImageReader::open(path)
        .map_err(|e| invalid(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| invalid(e.to_string()))?
        .decode()
        .map_err(|e| invalid(e.to_string()))
}

fn write_jpeg(img: &DynamicImage, quality: u8, output: &Path) -> Result<(), ToolifyError> {
    let file = File::create(output).map_err(|e| ToolifyError::io("create output image", e))?;
    let mut writer = BufWriter::new(file);
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .map_err(|e| ToolifyError::TransformFailed {
            operation: "encode JPEG".into(),
            detail: e.to_string(),
        })?;
    writer
        .flush()
        .map_err(|e| ToolifyError::io("write output image", e))
}

/// Re-encode `input` as a JPEG at `quality`; returns the output size in bytes.
pub async fn compress(
    input: &Path,
    name: &str,
    output: &Path,
    quality: Quality,
) -> Result<u64, ToolifyError> {
    let (input, name, output) = (input.to_path_buf(), name.to_string(), output.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let img = decode(&input, &name)?;
        write_jpeg(&img, quality.get(), &output)?;
        let size = std::fs::metadata(&output)
            .map_err(|e| ToolifyError::io("stat output image", e))?
            .len();
        debug!("Compressed '{}' at q{} → {} bytes", name, quality.get(), size);
        Ok(size)
    })
    .await
    .map_err(|e| ToolifyError::Internal(format!("Compress task panicked: {e}")))?
}

/// Convert `input` to `format`, writing to `output`.
pub async fn convert(
    input: &Path,
    name: &str,
    output: &Path,
    format: TargetFormat,
) -> Result<(), ToolifyError> {
    let (input, name, output) = (input.to_path_buf(), name.to_string(), output.to_path_buf());
    tokio::task::spawn_blocking(move || convert_blocking(&input, &name, &output, format))
        .await
        .map_err(|e| ToolifyError::Internal(format!("Convert task panicked: {e}")))?
}

fn convert_blocking(
    input: &Path,
    name: &str,
    output: &Path,
    format: TargetFormat,
) -> Result<(), ToolifyError> {
    let img = decode(input, name)?;
    debug!(
        "Converting '{}' ({}x{}) to {}",
        name,
        img.width(),
        img.height(),
        format
    );
    if format == TargetFormat::Jpeg {
        return write_jpeg(&img, CONVERT_JPEG_QUALITY, output);
    }

    // The WebP and GIF encoders only take 8-bit RGB(A).
    let img = DynamicImage::ImageRgba8(img.to_rgba8());
    let file = File::create(output).map_err(|e| ToolifyError::io("create output image", e))?;
    let mut writer = BufWriter::new(file);
    img.write_to(&mut writer, format.image_format())
        .map_err(|e| ToolifyError::TransformFailed {
            operation: format!("encode {format}"),
            detail: e.to_string(),
        })?;
    writer
        .flush()
        .map_err(|e| ToolifyError::io("write output image", e))
}

/// Output path helper: `<dir>/<stem>.<ext>`.
pub fn output_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{stem}.{ext}"))
}
