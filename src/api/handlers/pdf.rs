//! `/api/pdf/*`: merge and split.

use crate::api::download::respond;
use crate::api::upload::{self, UploadRules};
use crate::api::AppState;
use crate::config::SplitMode;
use crate::error::ToolifyError;
use crate::output::Artifact;
use crate::pipeline::{archive, pdf};
use axum::extract::{Multipart, State};
use axum::response::Response;
use tracing::info;

const MERGE: UploadRules =
    UploadRules::multiple(2, upload::PDF, "Please upload at least 2 PDF files");
const SPLIT: UploadRules = UploadRules::single(upload::PDF, "Please upload a PDF file");

/// `POST /api/pdf/merge`
pub async fn merge(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &MERGE, &state.config, &workspace).await?;

    let output = workspace.file("merged.pdf");
    let report = pdf::merge(&form.files, &output).await?;
    if !report.skipped.is_empty() {
        info!("Merge skipped unreadable inputs: {}", report.skipped.join(", "));
    }
    respond(Artifact::pdf(output, "merged.pdf"), workspace, &[]).await
}

/// `POST /api/pdf/split`
///
/// Several parts come back as `split-pdf.zip`; a single part is sent as-is.
pub async fn split(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &SPLIT, &state.config, &workspace).await?;
    let mode = SplitMode::from_fields(form.field("splitType"), form.field("pageRanges"))?;
    let (input, _) = form.into_single()?;

    let out_dir = workspace.subdir("split")?;
    let mut parts = pdf::split(&input, mode, &out_dir).await?;
    if parts.len() == 1 {
        let only = parts.remove(0);
        return respond(Artifact::pdf(only.path, only.name), workspace, &[]).await;
    }

    let zip = workspace.file("split-pdf.zip");
    let entries = parts.into_iter().map(|p| (p.name, p.path)).collect();
    archive::zip_files(entries, &zip).await?;
    respond(
        Artifact::new(zip, "split-pdf.zip", "application/zip"),
        workspace,
        &[],
    )
    .await
}
