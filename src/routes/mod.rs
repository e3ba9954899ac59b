use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower::{timeout::TimeoutLayer, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;

use crate::{config::AppConfig, logger::SharedLogger, AppState, TracingLogger};

pub mod demo;
pub mod health;

/// Builds the demo application with request logging in front of every route.
///
/// The hook sits outside the panic catcher and the timeout, so panics and
/// timeouts reach its error channel and are still logged with their final
/// status.
pub fn app(config: Arc<AppConfig>, logger: &TracingLogger) -> Router {
    let hook = logger
        .hook()
        .trust_proxy_headers(config.logging.trust_proxy_headers);
    let shared: SharedLogger = Arc::new(logger.clone());
    let timeout = Duration::from_secs(config.server.timeout_seconds);

    Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/health", get(health::health_detailed))
        .route("/api/v1/slow", get(demo::slow))
        .route("/api/v1/status/:code", get(demo::status))
        .route("/api/v1/boom", get(demo::boom))
        .route("/api/v1/log", post(demo::log_message))
        .route("/api/v1/log/level", get(demo::get_level).put(demo::set_level))
        .layer(
            ServiceBuilder::new()
                .layer(hook)
                .layer(CatchPanicLayer::new())
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(Extension(shared))
        .with_state(AppState { config })
}
