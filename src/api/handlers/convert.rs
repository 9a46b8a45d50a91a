//! `/api/convert/*`: document conversions and OCR.

use super::parse_field;
use crate::api::download::respond;
use crate::api::upload::{self, UploadRules};
use crate::api::AppState;
use crate::config::OcrLanguage;
use crate::convert::{ConversionJob, ConversionKind, FallbackChain, METHOD_HEADER};
use crate::error::ToolifyError;
use crate::pipeline::ocr::OcrEngine;
use axum::extract::{Multipart, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use axum::Json;
use serde::Serialize;

const WORD: UploadRules = UploadRules::single(upload::WORD, "Please upload a Word document");
const EXCEL: UploadRules = UploadRules::single(upload::EXCEL, "Please upload an Excel file");
const PDF: UploadRules = UploadRules::single(upload::PDF, "Please upload a PDF file");
const OCR: UploadRules = UploadRules::single(upload::OCR_IMAGES, "Please upload an image file");

/// `POST /api/convert/word-to-pdf`
pub async fn word_to_pdf(state: State<AppState>, multipart: Multipart) -> Result<Response, ToolifyError> {
    run_chain(state, multipart, ConversionKind::WordToPdf, &WORD).await
}

/// `POST /api/convert/excel-to-pdf`
pub async fn excel_to_pdf(state: State<AppState>, multipart: Multipart) -> Result<Response, ToolifyError> {
    run_chain(state, multipart, ConversionKind::ExcelToPdf, &EXCEL).await
}

/// `POST /api/convert/pdf-to-image`
pub async fn pdf_to_image(state: State<AppState>, multipart: Multipart) -> Result<Response, ToolifyError> {
    run_chain(state, multipart, ConversionKind::PdfToImage, &PDF).await
}

async fn run_chain(
    State(state): State<AppState>,
    mut multipart: Multipart,
    kind: ConversionKind,
    rules: &UploadRules,
) -> Result<Response, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, rules, &state.config, &workspace).await?;
    let (input, _) = form.into_single()?;

    let job = ConversionJob {
        kind,
        input,
        workdir: workspace.subdir("convert")?,
        render_max_pixels: state.config.render_max_pixels,
    };
    let outcome = FallbackChain::for_kind(kind, &state.tools).run(&job).await?;

    let header = (
        HeaderName::from_static(METHOD_HEADER),
        HeaderValue::from_static(outcome.method),
    );
    respond(outcome.artifact, workspace, &[header]).await
}

#[derive(Debug, Serialize)]
pub struct OcrResponse {
    pub text: String,
}

/// `POST /api/convert/ocr`
pub async fn ocr(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<OcrResponse>, ToolifyError> {
    let workspace = state.workspace()?;
    let form = upload::receive(&mut multipart, &OCR, &state.config, &workspace).await?;
    let language: OcrLanguage = parse_field(form.field("language"))?;
    let (input, _) = form.into_single()?;

    let session = OcrEngine::new(&state.tools.tesseract).acquire(language)?;
    let text = session.recognize(&input.path).await?;
    Ok(Json(OcrResponse { text }))
}
