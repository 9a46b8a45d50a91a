//! Streaming an artifact back to the client.
//!
//! The response body owns the request workspace: the directory is removed
//! when the body is dropped, which happens after the last chunk is sent or
//! when the client disconnects mid-download.

use crate::error::ToolifyError;
use crate::output::Artifact;
use crate::workspace::RequestWorkspace;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use std::fmt::Write;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::io::ReaderStream;
use tracing::info;

struct CleanupStream {
    inner: ReaderStream<tokio::fs::File>,
    _workspace: RequestWorkspace,
}

impl Stream for CleanupStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Stream `artifact` as an attachment; `extra` headers are added verbatim.
pub async fn respond(
    artifact: Artifact,
    workspace: RequestWorkspace,
    extra: &[(HeaderName, HeaderValue)],
) -> Result<Response, ToolifyError> {
    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|e| ToolifyError::io("open result file", e))?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ToolifyError::io("stat result file", e))?
        .len();

    let content_type = HeaderValue::from_str(&artifact.content_type)
        .map_err(|e| ToolifyError::Internal(format!("bad content type: {e}")))?;
    let disposition = HeaderValue::from_str(&content_disposition(&artifact.download_name))
        .map_err(|e| ToolifyError::Internal(format!("bad download name: {e}")))?;

    info!(
        "Sending '{}' ({} bytes, {})",
        artifact.download_name, len, artifact.content_type
    );
    let body = Body::from_stream(CleanupStream {
        inner: ReaderStream::new(file),
        _workspace: workspace,
    });
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    for (name, value) in extra {
        headers.insert(name.clone(), value.clone());
    }
    Ok(response)
}

/// `attachment` with an ASCII `filename` and an RFC 5987 `filename*`.
pub fn content_disposition(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' '..='~' => c,
            _ => '_',
        })
        .collect();
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => {
                let _ = write!(encoded, "%{byte:02X}");
            }
        }
    }
    format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_keeps_ascii_and_encodes_the_rest() {
        assert_eq!(
            content_disposition("merged.pdf"),
            "attachment; filename=\"merged.pdf\"; filename*=UTF-8''merged.pdf"
        );
        assert_eq!(
            content_disposition("résumé \"v2\".jpg"),
            "attachment; filename=\"r_sum_ _v2_.jpg\"; filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.jpg"
        );
    }

    #[tokio::test]
    async fn workspace_survives_until_body_is_dropped() {
        let root = tempfile::tempdir().unwrap();
        let workspace = RequestWorkspace::create(root.path()).unwrap();
        let dir = workspace.path().to_path_buf();
        let path = workspace.file("out.pdf");
        std::fs::write(&path, b"%PDF-1.5 test").unwrap();

        let response = respond(Artifact::pdf(&path, "out.pdf"), workspace, &[])
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
        assert!(dir.exists());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"%PDF-1.5 test");
        assert!(!dir.exists());
    }
}
