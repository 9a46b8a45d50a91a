//! `/api/image/*`: compress, convert and image-to-PDF.

use super::parse_field;
use crate::api::download::respond;
use crate::api::upload::{self, UploadRules};
use crate::api::AppState;
use crate::config::{Quality, TargetFormat};
use crate::error::ToolifyError;
use crate::output::Artifact;
use crate::pipeline::{imaging, pdf};
use axum::extract::{Multipart, State};
use axum::response::Response;
use tracing::info;

const COMPRESS: UploadRules =
    UploadRules::single(upload::COMPRESSIBLE_IMAGES, "Please upload an image file");
const CONVERT: UploadRules = UploadRules::single(upload::IMAGES, "Please upload an image file");
const TO_PDF: UploadRules =
    UploadRules::multiple(1, upload::IMAGES, "Please upload at least one image file");

/// `POST /api/image/compress`
pub async fn compress(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &COMPRESS, &state.config, &workspace).await?;
    let quality: Quality = parse_field(form.field("quality"))?;
    let (input, _) = form.into_single()?;

    let output = imaging::output_path(workspace.path(), "compressed", "jpg");
    let size = imaging::compress(&input.path, &input.original_name, &output, quality).await?;
    info!(
        "Compressed '{}' from {} to {} bytes (q{})",
        input.original_name,
        input.size,
        size,
        quality.get()
    );
    let download = format!("compressed-{}.jpg", input.stem());
    respond(Artifact::new(output, download, "image/jpeg"), workspace, &[]).await
}

/// `POST /api/image/convert`
pub async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &CONVERT, &state.config, &workspace).await?;
    let format: TargetFormat = parse_field(form.field("format"))?;
    let (input, _) = form.into_single()?;

    let output = imaging::output_path(workspace.path(), "converted", format.as_str());
    imaging::convert(&input.path, &input.original_name, &output, format).await?;
    let download = format!("{}.{}", input.stem(), format);
    respond(
        Artifact::new(output, download, format.content_type()),
        workspace,
        &[],
    )
    .await
}

/// `POST /api/image/image-to-pdf`
pub async fn image_to_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &TO_PDF, &state.config, &workspace).await?;

    let output = workspace.file("converted.pdf");
    let pages = pdf::images_to_pdf(&form.files, &output).await?;
    info!("Placed {} image(s) on A4 pages", pages);
    respond(Artifact::pdf(output, "converted.pdf"), workspace, &[]).await
}
