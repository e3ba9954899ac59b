use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::BoxError;
use serde_json::json;
use thiserror::Error;
use tower::timeout::error::Elapsed;

/// Error a handler can fail with to pick the response status itself.
///
/// The rendered response carries a copy of the error in its extensions, so a
/// [`RequestLogLayer`](super::RequestLogLayer) outside the route can hand it
/// to its [`ErrorHandler`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status, Json(json!({ "message": self.message.as_str() }))).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Receives errors from wrapped services and renders the response for them.
pub trait ErrorHandler: Clone + Send + Sync + 'static {
    fn handle_error(&self, error: BoxError) -> Response;
}

impl<F> ErrorHandler for F
where
    F: Fn(BoxError) -> Response + Clone + Send + Sync + 'static,
{
    fn handle_error(&self, error: BoxError) -> Response {
        self(error)
    }
}

/// [`HttpError`]s keep their status and message, tower timeouts become 408,
/// anything else becomes a bare 500.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn handle_error(&self, error: BoxError) -> Response {
        if error.is::<Elapsed>() {
            return HttpError::new(StatusCode::REQUEST_TIMEOUT, "Request Timeout").into_response();
        }
        match error.downcast::<HttpError>() {
            Ok(http) => (*http).into_response(),
            Err(_) => HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            )
            .into_response(),
        }
    }
}
