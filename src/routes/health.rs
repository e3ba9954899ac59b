use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize)]
pub struct DetailedHealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub logging: LoggingInfo,
}

#[derive(Serialize, Deserialize)]
pub struct LoggingInfo {
    pub level: String,
    pub format: String,
    pub output: String,
    pub trust_proxy_headers: bool,
}

/// Basic health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Detailed health check endpoint
///
/// Also reports the logging settings the server was started with.
pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    info!("Detailed health check requested");

    let logging = &state.config.logging;
    Json(DetailedHealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        logging: LoggingInfo {
            level: logging.level.clone(),
            format: format!("{:?}", logging.format).to_lowercase(),
            output: logging.output.clone(),
            trust_proxy_headers: logging.trust_proxy_headers,
        },
    })
}
