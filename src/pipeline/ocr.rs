//! Text extraction through the tesseract engine.
//!
//! Each request acquires its own [`OcrSession`], which starts one tesseract
//! process for one image and is consumed by [`OcrSession::recognize`].
//! Sessions are never pooled: every request pays the engine start-up cost,
//! and no state (language data, temp files) survives between requests.

use crate::config::OcrLanguage;
use crate::error::{AttemptError, ToolifyError};
use crate::tools::{Capability, ExternalTool};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, info};

const INSTALL_HINT: &str =
    "Install tesseract-ocr and the language data (e.g. tesseract-ocr-eng) on the server.";

/// Entry point for OCR, borrowing the configured tesseract tool.
#[derive(Debug, Clone, Copy)]
pub struct OcrEngine<'a> {
    tool: &'a ExternalTool,
}

/// One acquired engine instance for one image.
#[derive(Debug)]
pub struct OcrSession<'a> {
    tool: &'a ExternalTool,
    language: OcrLanguage,
}

impl<'a> OcrEngine<'a> {
    pub fn new(tool: &'a ExternalTool) -> Self {
        Self { tool }
    }

    /// Acquire a session for `language`; fails if tesseract is not installed.
    pub fn acquire(&self, language: OcrLanguage) -> Result<OcrSession<'a>, ToolifyError> {
        if !self.tool.is_available() && !self.tool.refresh() {
            return Err(ToolifyError::ToolUnavailable {
                tool: "tesseract".into(),
                hint: INSTALL_HINT.into(),
            });
        }
        debug!(language = language.code(), "Acquired OCR session");
        Ok(OcrSession {
            tool: self.tool,
            language,
        })
    }
}

impl OcrSession<'_> {
    /// Recognise the text in `image`, releasing the session.
    pub async fn recognize(self, image: &Path) -> Result<String, ToolifyError> {
        let args = [
            image.as_os_str(),
            OsStr::new("stdout"),
            OsStr::new("-l"),
            OsStr::new(self.language.code()),
        ];
        let output = self.tool.run(args, None).await.map_err(|e| match e {
            AttemptError::Unavailable { reason, .. } => ToolifyError::ToolUnavailable {
                tool: "tesseract".into(),
                hint: format!("{reason}. {INSTALL_HINT}"),
            },
            other => ToolifyError::TransformFailed {
                operation: "perform OCR".into(),
                detail: other.to_string(),
            },
        })?;
        let text = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\n', '\u{c}'])
            .to_string();
        info!(
            language = self.language.code(),
            chars = text.len(),
            "OCR finished"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn acquire_fails_without_tesseract() {
        let tool = ExternalTool::new("tesseract", "/nonexistent/tesseract", Duration::from_secs(1));
        let err = OcrEngine::new(&tool).acquire(OcrLanguage::English).unwrap_err();
        assert!(matches!(err, ToolifyError::ToolUnavailable { .. }));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
