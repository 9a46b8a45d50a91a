//! Result artifacts produced by transforms.

use serde::Serialize;
use std::path::PathBuf;

/// A file produced inside a request workspace, ready to stream to the client.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    /// Location inside the request workspace.
    pub path: PathBuf,
    /// Name offered to the browser in `Content-Disposition`.
    pub download_name: String,
    /// `Content-Type` of the download.
    pub content_type: String,
}

impl Artifact {
    pub fn new(
        path: impl Into<PathBuf>,
        download_name: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            download_name: download_name.into(),
            content_type: content_type.into(),
        }
    }

    pub fn pdf(path: impl Into<PathBuf>, download_name: impl Into<String>) -> Self {
        Self::new(path, download_name, "application/pdf")
    }

    /// Content type guessed from the download name's extension.
    pub fn guessed(path: impl Into<PathBuf>, download_name: impl Into<String>) -> Self {
        let download_name = download_name.into();
        let content_type = mime_guess::from_path(&download_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self::new(path, download_name, content_type)
    }
}
