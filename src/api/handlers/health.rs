//! `GET /api/health`

use crate::api::AppState;
use crate::tools::CapabilityReport;
use axum::extract::State;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    /// Which optional engines this server can use right now.
    pub capabilities: CapabilityReport,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        message: "Toolify API is running",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        capabilities: state.tools.report(),
    })
}
