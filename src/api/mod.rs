//! HTTP surface: router, shared state and middleware.
//!
//! ## Layering (outermost first)
//!
//! ```text
//! TraceLayer ─▶ CORS ─▶ error details ─▶ CatchPanic ─▶ body limit ─▶ routes
//!                                                                    ├─ /api/* (rate limited)
//!                                                                    └─ static client or 404
//! ```
//!
//! Handlers return [`ToolifyError`] on failure. Its `IntoResponse` writes the
//! public JSON body and attaches an [`ErrorReport`]; the error-details
//! middleware adds the full error text outside production. Panics become a
//! [`ToolifyError::Internal`] carrying the panic message, so they get the same
//! treatment.

pub mod download;
pub mod handlers;
pub mod rate_limit;
pub mod upload;

use crate::config::ServerConfig;
use crate::convert::METHOD_HEADER;
use crate::error::{ErrorReport, ToolifyError};
use crate::tools::Toolbox;
use crate::workspace::RequestWorkspace;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, OriginalUri, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

/// Largest error body the details middleware will rewrite.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub tools: Arc<Toolbox>,
}

impl AppState {
    /// Prepare the upload root and probe optional capabilities.
    pub fn new(mut config: ServerConfig) -> Result<Self, ToolifyError> {
        std::fs::create_dir_all(&config.upload_dir)
            .map_err(|e| ToolifyError::io("create upload directory", e))?;
        config.upload_dir = config
            .upload_dir
            .canonicalize()
            .map_err(|e| ToolifyError::io("resolve upload directory", e))?;
        info!("Upload root: {}", config.upload_dir.display());

        let tools = Toolbox::from_config(&config);
        Ok(Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
        })
    }

    /// A fresh working directory for one request.
    pub fn workspace(&self) -> Result<RequestWorkspace, ToolifyError> {
        RequestWorkspace::create(&self.config.upload_dir)
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    use handlers::{convert, health, image, pdf};

    let api = Router::new()
        .route("/pdf/merge", post(pdf::merge))
        .route("/pdf/split", post(pdf::split))
        .route("/image/compress", post(image::compress))
        .route("/image/convert", post(image::convert))
        .route("/image/image-to-pdf", post(image::image_to_pdf))
        .route("/convert/word-to-pdf", post(convert::word_to_pdf))
        .route("/convert/excel-to-pdf", post(convert::excel_to_pdf))
        .route("/convert/pdf-to-image", post(convert::pdf_to_image))
        .route("/convert/ocr", post(convert::ocr))
        .route("/health", get(health::health))
        .fallback(not_found);
    let api = rate_limit::apply(api, &state.config);

    let mut app = Router::new().nest("/api", api);
    app = match &state.config.static_dir {
        Some(dir) => {
            info!("Serving client from {}", dir.display());
            app.fallback_service(
                ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))),
            )
        }
        None => app.fallback(not_found),
    };

    edge_layers(app, state)
}

/// Wrap `app` in the layers every response passes through.
fn edge_layers(app: Router<AppState>, state: AppState) -> Router {
    app.layer(DefaultBodyLimit::max(state.config.body_limit()))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(from_fn_with_state(state.clone(), error_details))
        .layer(cors_layer(&state.config))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    // Origins were validated by the config builder.
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            HeaderName::from_static(METHOD_HEADER),
        ])
}

async fn not_found(OriginalUri(uri): OriginalUri) -> ToolifyError {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    ToolifyError::NotFound { path }
}

/// Add `details` to error bodies unless running in production.
async fn error_details(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if !state.config.expose_error_details() {
        return response;
    }
    let Some(report) = response.extensions().get::<ErrorReport>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let mut value = match axum::body::to_bytes(body, MAX_ERROR_BODY).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| json!({})),
        Err(_) => json!({}),
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("details".into(), report.details.into());
    }
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(value.to_string()))
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ToolifyError::Internal(format!("handler panicked: {detail}")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::error::GENERIC_SERVER_ERROR;
    use axum::http::StatusCode;
    use axum_test::TestServer;

    async fn boom() -> &'static str {
        panic!("page tree exploded")
    }

    fn panicking_server(environment: Environment, root: &std::path::Path) -> TestServer {
        let config = ServerConfig::builder()
            .upload_dir(root)
            .environment(environment)
            .pdfium_lib_path("/nonexistent/libpdfium.so")
            .build()
            .unwrap();
        let app = Router::new().route("/boom", get(boom));
        TestServer::new(edge_layers(app, AppState::new(config).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn panics_are_json_500s_with_details_outside_production() {
        let root = tempfile::tempdir().unwrap();

        let response = panicking_server(Environment::Development, root.path()).get("/boom").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], GENERIC_SERVER_ERROR);
        assert!(body["details"].as_str().unwrap().contains("page tree exploded"));

        let response = panicking_server(Environment::Production, root.path()).get("/boom").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], GENERIC_SERVER_ERROR);
        assert!(body.get("details").is_none());
    }
}
