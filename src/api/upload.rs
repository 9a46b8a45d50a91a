//! Multipart intake: validate each file part and stream it into the request
//! workspace.
//!
//! Type and count checks happen before a single byte is written; the size
//! limit is enforced chunk by chunk, so an oversized part is rejected as soon
//! as it crosses the limit rather than after it has been buffered.

use crate::config::ServerConfig;
use crate::error::ToolifyError;
use crate::workspace::{RequestWorkspace, Upload};
use axum::extract::multipart::{Field, Multipart, MultipartError};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// How an endpoint decides whether a file is acceptable.
#[derive(Debug, Clone, Copy)]
pub enum Accept {
    /// Declared MIME type (or a guess from the file name when none was sent).
    MimeTypes(&'static [&'static str]),
    /// Lower-case file extension, without the dot.
    Extensions(&'static [&'static str]),
}

impl Accept {
    fn allows(&self, content_type: &str, file_name: &str) -> bool {
        match self {
            Accept::MimeTypes(types) => types.iter().any(|t| t.eq_ignore_ascii_case(content_type)),
            Accept::Extensions(exts) => Path::new(file_name)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|e| exts.contains(&e.as_str())),
        }
    }

    fn describe(&self) -> String {
        match self {
            Accept::MimeTypes(types) => types.join(", "),
            Accept::Extensions(exts) => exts
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

pub const PDF: Accept = Accept::MimeTypes(&["application/pdf"]);
pub const COMPRESSIBLE_IMAGES: Accept =
    Accept::MimeTypes(&["image/jpeg", "image/jpg", "image/png", "image/webp"]);
pub const IMAGES: Accept = Accept::MimeTypes(&[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
]);
pub const OCR_IMAGES: Accept = Accept::MimeTypes(&[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/tiff",
    "image/bmp",
]);
pub const WORD: Accept = Accept::Extensions(&["docx", "doc"]);
pub const EXCEL: Accept = Accept::Extensions(&["xlsx", "xls"]);

/// Per-endpoint upload constraints.
#[derive(Debug, Clone, Copy)]
pub struct UploadRules {
    /// Form field carrying the file(s); `<field>[]` is accepted too.
    pub field: &'static str,
    pub min_files: usize,
    /// `None` means the configured `max_files`.
    pub max_files: Option<usize>,
    pub accept: Accept,
    /// Error text when fewer than `min_files` arrive.
    pub missing_message: &'static str,
}

impl UploadRules {
    /// Exactly one file in `file`.
    pub const fn single(accept: Accept, missing_message: &'static str) -> Self {
        Self {
            field: "file",
            min_files: 1,
            max_files: Some(1),
            accept,
            missing_message,
        }
    }

    /// Several files in `files`, bounded by the server's `max_files`.
    pub const fn multiple(min_files: usize, accept: Accept, missing_message: &'static str) -> Self {
        Self {
            field: "files",
            min_files,
            max_files: None,
            accept,
            missing_message,
        }
    }

    fn matches_field(&self, name: &str) -> bool {
        name == self.field || name.strip_suffix("[]") == Some(self.field)
    }
}

/// Everything a multipart request carried.
#[derive(Debug, Default)]
pub struct ReceivedForm {
    pub files: Vec<Upload>,
    pub fields: HashMap<String, String>,
}

impl ReceivedForm {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The single upload of a one-file endpoint.
    pub fn into_single(mut self) -> Result<(Upload, HashMap<String, String>), ToolifyError> {
        let upload = self
            .files
            .pop()
            .ok_or_else(|| ToolifyError::Internal("validated form has no file".into()))?;
        Ok((upload, self.fields))
    }
}

fn multipart_error(e: MultipartError) -> ToolifyError {
    ToolifyError::Multipart(e.body_text())
}

/// Read the whole multipart body, storing files inside `workspace`.
pub async fn receive(
    multipart: &mut Multipart,
    rules: &UploadRules,
    config: &ServerConfig,
    workspace: &RequestWorkspace,
) -> Result<ReceivedForm, ToolifyError> {
    let max_files = rules.max_files.unwrap_or(config.max_files);
    let mut form = ReceivedForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);

        let Some(file_name) = file_name else {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
            continue;
        };
        // Browsers send an empty part for an untouched file input.
        if file_name.is_empty() {
            continue;
        }
        if !rules.matches_field(&name) {
            return Err(ToolifyError::invalid_field(
                name,
                format!("unexpected file field; files go in '{}'", rules.field),
            ));
        }
        if form.files.len() >= max_files {
            return Err(ToolifyError::TooManyFiles { max: max_files });
        }

        let content_type = field
            .content_type()
            .map(str::to_string)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&file_name)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            });
        if !rules.accept.allows(&content_type, &file_name) {
            return Err(ToolifyError::UnsupportedFileType {
                name: file_name,
                content_type,
                accepted: rules.accept.describe(),
            });
        }

        let upload = store(field, file_name, content_type, config.max_file_size, workspace).await?;
        form.files.push(upload);
    }

    if form.files.len() < rules.min_files {
        return Err(ToolifyError::MissingUpload {
            message: rules.missing_message.to_string(),
        });
    }
    debug!(
        "Received {} file(s) and {} field(s)",
        form.files.len(),
        form.fields.len()
    );
    Ok(form)
}

async fn store(
    mut field: Field<'_>,
    original_name: String,
    content_type: String,
    limit: u64,
    workspace: &RequestWorkspace,
) -> Result<Upload, ToolifyError> {
    let (storage_name, path) = workspace.storage_path(&original_name);
    let mut out = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ToolifyError::io("store upload", e))?;

    let mut size: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        size += chunk.len() as u64;
        if size > limit {
            return Err(ToolifyError::FileTooLarge {
                name: original_name,
                limit,
            });
        }
        out.write_all(&chunk)
            .await
            .map_err(|e| ToolifyError::io("store upload", e))?;
    }
    out.flush()
        .await
        .map_err(|e| ToolifyError::io("store upload", e))?;

    debug!("Stored '{}' ({} bytes, {})", original_name, size, content_type);
    Ok(Upload {
        storage_name,
        original_name,
        content_type,
        size,
        path,
    })
}
