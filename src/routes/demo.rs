use std::time::Duration;

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::{Deserialize, Serialize};

use crate::{logger::SharedLogger, HttpError, Lvl};

#[derive(Debug, Deserialize)]
pub struct SlowParams {
    pub ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LevelBody {
    pub level: String,
}

pub async fn slow(Query(params): Query<SlowParams>) -> String {
    let ms = params.ms.unwrap_or(10);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    format!("slept {ms}ms")
}

/// Responds with the requested status; 4xx/5xx come back as [`HttpError`]s.
pub async fn status(Path(code): Path<u16>) -> Result<StatusCode, HttpError> {
    let status = StatusCode::from_u16(code).map_err(|_| {
        HttpError::new(StatusCode::BAD_REQUEST, format!("invalid status code {code}"))
    })?;

    if status.is_client_error() || status.is_server_error() {
        return Err(HttpError::new(
            status,
            status.canonical_reason().unwrap_or("error"),
        ));
    }
    Ok(status)
}

pub async fn boom() -> &'static str {
    panic!("boom requested")
}

pub async fn log_message(
    Extension(logger): Extension<SharedLogger>,
    Json(body): Json<LogMessage>,
) -> Result<StatusCode, HttpError> {
    let lvl = parse_level(&body.level)?;
    match lvl {
        Lvl::DEBUG => logger.debug(format_args!("{}", body.message)),
        Lvl::INFO => logger.info(format_args!("{}", body.message)),
        Lvl::WARN => logger.warn(format_args!("{}", body.message)),
        Lvl::ERROR => logger.error(format_args!("{}", body.message)),
        _ => {}
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_level(Extension(logger): Extension<SharedLogger>) -> Json<LevelBody> {
    Json(LevelBody {
        level: logger.level().to_string(),
    })
}

pub async fn set_level(
    Extension(logger): Extension<SharedLogger>,
    Json(body): Json<LevelBody>,
) -> Result<Json<LevelBody>, HttpError> {
    logger.set_level(parse_level(&body.level)?);
    Ok(Json(LevelBody {
        level: logger.level().to_string(),
    }))
}

fn parse_level(level: &str) -> Result<Lvl, HttpError> {
    level
        .parse::<Lvl>()
        .map_err(|e| HttpError::new(StatusCode::BAD_REQUEST, e.to_string()))
}
