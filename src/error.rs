//! Error types for the toolify service.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ToolifyError`]: **Fatal** for the request: the upload is invalid, a
//!   transform failed outright, or the server itself misbehaved. Every handler
//!   returns `Result<_, ToolifyError>` and the error renders itself as a JSON
//!   response with the right status code.
//!
//! * [`AttemptError`]: **Non-fatal**: one conversion method in a fallback
//!   chain could not produce a result. The chain records it and moves on to
//!   the next method; it only becomes visible if every method fails, or as the
//!   list of reasons printed on a placeholder document.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Message returned for server-side failures when details are not exposed.
pub const GENERIC_SERVER_ERROR: &str = "Something went wrong!";

/// All fatal errors a request can end with.
#[derive(Debug, Error)]
pub enum ToolifyError {
    // ── Upload errors ─────────────────────────────────────────────────────
    /// The required file field was absent, or fewer files than needed were sent.
    #[error("{message}")]
    MissingUpload { message: String },

    /// More files than the endpoint accepts.
    #[error("Too many files: at most {max} files are accepted per request")]
    TooManyFiles { max: usize },

    /// A single file exceeded the per-file size limit while streaming.
    #[error("File '{name}' is too large: the limit is {limit} bytes")]
    FileTooLarge { name: String, limit: u64 },

    /// The file's declared type (or extension) is not accepted by the endpoint.
    #[error("Unsupported file type '{content_type}' for '{name}'. Accepted: {accepted}")]
    UnsupportedFileType {
        name: String,
        content_type: String,
        accepted: String,
    },

    /// A text form field carried an invalid value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// A page-range token was neither `N` nor `N-M`.
    #[error("Malformed page range '{token}'. Use N or N-M, separated by commas (e.g. 1-3,5)")]
    MalformedPageRange { token: String },

    /// Every requested range fell outside the document.
    #[error("No valid page ranges: the document has {total} pages")]
    NoValidRanges { total: u32 },

    /// The upload claimed to be a PDF but could not be parsed.
    #[error("File '{name}' is not a valid PDF: {detail}")]
    InvalidPdf { name: String, detail: String },

    /// The upload claimed to be an image but could not be decoded.
    #[error("Could not decode image '{name}': {detail}")]
    InvalidImage { name: String, detail: String },

    /// Every PDF handed to merge failed to parse or had no pages.
    #[error("Failed to merge PDFs. No valid pages found.")]
    NothingToMerge,

    /// The multipart body itself was malformed or truncated.
    #[error("Malformed upload: {0}")]
    Multipart(String),

    // ── Tool errors ───────────────────────────────────────────────────────
    /// A required external engine is not installed or cannot be started.
    #[error("{tool} is not available on this server.\n{hint}")]
    ToolUnavailable { tool: String, hint: String },

    /// A transform ran but failed.
    #[error("Failed to {operation}: {detail}")]
    TransformFailed { operation: String, detail: String },

    /// Every method in a fallback chain failed, placeholder included.
    #[error("All conversion methods failed for {conversion}: {}", join_attempts(.failures))]
    ConversionExhausted {
        conversion: String,
        failures: Vec<AttemptError>,
    },

    // ── Edge errors ───────────────────────────────────────────────────────
    /// The client exceeded the per-IP request budget.
    #[error("Too many requests from this IP, please try again later.")]
    RateLimited { retry_after_secs: u64 },

    /// No route matched.
    #[error("The requested URL {path} was not found on this server.")]
    NotFound { path: String },

    // ── I/O and config errors ─────────────────────────────────────────────
    /// Filesystem failure while handling a request.
    #[error("I/O error while trying to {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn join_attempts(failures: &[AttemptError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ToolifyError {
    /// Shorthand for [`ToolifyError::Io`].
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Shorthand for [`ToolifyError::InvalidField`].
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ToolifyError::MissingUpload { .. }
            | ToolifyError::TooManyFiles { .. }
            | ToolifyError::FileTooLarge { .. }
            | ToolifyError::UnsupportedFileType { .. }
            | ToolifyError::InvalidField { .. }
            | ToolifyError::MalformedPageRange { .. }
            | ToolifyError::NoValidRanges { .. }
            | ToolifyError::InvalidPdf { .. }
            | ToolifyError::InvalidImage { .. }
            | ToolifyError::NothingToMerge
            | ToolifyError::Multipart(_) => StatusCode::BAD_REQUEST,
            ToolifyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ToolifyError::NotFound { .. } => StatusCode::NOT_FOUND,
            ToolifyError::ToolUnavailable { .. }
            | ToolifyError::TransformFailed { .. }
            | ToolifyError::ConversionExhausted { .. }
            | ToolifyError::Io { .. }
            | ToolifyError::InvalidConfig(_)
            | ToolifyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message shown to every client, regardless of environment.
    ///
    /// Client errors describe the problem; server errors stay terse and the
    /// full text travels in [`ErrorReport::details`] instead.
    pub fn user_message(&self) -> String {
        match self {
            ToolifyError::ToolUnavailable { tool, .. } => {
                format!("{tool} is not available on this server")
            }
            ToolifyError::TransformFailed { operation, .. } => format!("Failed to {operation}"),
            ToolifyError::ConversionExhausted { conversion, .. } => {
                format!("Failed to convert {conversion}")
            }
            ToolifyError::Io { .. } | ToolifyError::InvalidConfig(_) | ToolifyError::Internal(_) => {
                GENERIC_SERVER_ERROR.to_string()
            }
            other => other.to_string(),
        }
    }

    /// The `error` field of the JSON body for 404s is fixed; the text moves to `message`.
    fn body(&self) -> serde_json::Value {
        match self {
            ToolifyError::NotFound { .. } => json!({
                "error": "Not Found",
                "message": self.to_string(),
            }),
            _ => json!({ "error": self.user_message() }),
        }
    }
}

/// Attached to every error response so outer middleware can decide whether to
/// expose the full error text.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub status: StatusCode,
    pub details: String,
}

impl IntoResponse for ToolifyError {
    fn into_response(self) -> Response {
        match &self {
            ToolifyError::Io { .. } | ToolifyError::InvalidConfig(_) | ToolifyError::Internal(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            ToolifyError::ToolUnavailable { .. }
            | ToolifyError::TransformFailed { .. }
            | ToolifyError::ConversionExhausted { .. } => {
                tracing::warn!("Transform error: {}", self);
            }
            ToolifyError::RateLimited { .. } => {
                tracing::info!("Rate limit hit: {}", self);
            }
            _ => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();

        if let ToolifyError::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response.extensions_mut().insert(ErrorReport {
            status,
            details: self.to_string(),
        });
        response
    }
}

/// Why a single conversion method did not produce a result.
///
/// Collected by [`crate::convert::FallbackChain`]; the chain continues with
/// the next method unless this was the last one.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptError {
    /// The backing capability is not installed; the method was skipped.
    #[error("{method}: not available ({reason})")]
    Unavailable { method: &'static str, reason: String },

    /// The method cannot handle this input format.
    #[error("{method}: input not supported ({reason})")]
    Unsupported { method: &'static str, reason: String },

    /// The method ran and failed.
    #[error("{method}: failed: {detail}")]
    Failed { method: &'static str, detail: String },

    /// The method exceeded the tool timeout and was killed.
    #[error("{method}: timed out after {secs}s")]
    TimedOut { method: &'static str, secs: u64 },

    /// The method reported success but left no output file behind.
    #[error("{method}: finished without producing output")]
    NoOutput { method: &'static str },
}

impl AttemptError {
    pub fn method(&self) -> &'static str {
        match self {
            AttemptError::Unavailable { method, .. }
            | AttemptError::Unsupported { method, .. }
            | AttemptError::Failed { method, .. }
            | AttemptError::TimedOut { method, .. }
            | AttemptError::NoOutput { method } => method,
        }
    }

    pub fn failed(method: &'static str, detail: impl ToString) -> Self {
        AttemptError::Failed {
            method,
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_bad_request() {
        let e = ToolifyError::MalformedPageRange { token: "a-b".into() };
        assert_eq!(e.status_code(), StatusCode::BAD_REQUEST);
        assert!(e.user_message().contains("a-b"));
    }

    #[test]
    fn internal_errors_hide_detail_in_user_message() {
        let e = ToolifyError::io(
            "write upload",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.user_message(), GENERIC_SERVER_ERROR);
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn exhausted_lists_every_attempt() {
        let e = ToolifyError::ConversionExhausted {
            conversion: "Word to PDF".into(),
            failures: vec![
                AttemptError::Unavailable {
                    method: "libreoffice",
                    reason: "soffice not found".into(),
                },
                AttemptError::NoOutput { method: "placeholder" },
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("libreoffice"), "got: {msg}");
        assert!(msg.contains("placeholder"), "got: {msg}");
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = ToolifyError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn attempt_error_reports_method() {
        let e = AttemptError::TimedOut { method: "ghostscript", secs: 5 };
        assert_eq!(e.method(), "ghostscript");
        assert!(e.to_string().contains("5s"));
    }
}
