//! Request logging: one structured entry per handled request.
//!
//! Status and latency are fixed when the inner service resolves. The entry
//! itself is written once the response body has been fully streamed (or
//! dropped), so `bytes_out` reflects what was actually sent.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Request, Response};
use axum::BoxError;
use bytes::Buf;
use chrono::{Local, SecondsFormat};
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;
use tower::util::Oneshot;
use tower::{Layer, Service, ServiceExt};

use super::error_handler::{DefaultErrorHandler, ErrorHandler, HttpError};
use super::real_ip::{real_ip, IpExtractor};
use crate::logger::TracingLogger;

/// What gets recorded for a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestLogEntry {
    pub time: String,
    pub remote_ip: String,
    pub host: String,
    pub uri: String,
    pub method: String,
    pub path: String,
    pub referer: String,
    pub user_agent: String,
    pub status: u16,
    pub latency: Duration,
    pub bytes_in: String,
    pub bytes_out: u64,
}

impl RequestLogEntry {
    fn from_request<B>(request: &Request<B>, extractor: IpExtractor) -> Self {
        let headers = request.headers();
        let uri = request.uri();
        let mut host = header_string(headers, &header::HOST);
        if host.is_empty() {
            host = uri.authority().map(|a| a.to_string()).unwrap_or_default();
        }

        Self {
            remote_ip: real_ip(request, extractor),
            host,
            // Origin form, even when the client sent an absolute URI.
            uri: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
            method: request.method().to_string(),
            path: uri.path().to_string(),
            referer: header_string(headers, &header::REFERER),
            user_agent: header_string(headers, &header::USER_AGENT),
            bytes_in: header_string(headers, &header::CONTENT_LENGTH),
            ..Self::default()
        }
    }

    pub fn latency_micros(&self) -> u64 {
        u64::try_from(self.latency.as_micros()).unwrap_or(u64::MAX)
    }

    /// Unit-scaled rendering of `latency`, e.g. `10.2ms` or `1.5s`.
    pub fn latency_human(&self) -> String {
        format!("{:?}", self.latency)
    }
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

/// [`Layer`] that wraps a service with request logging.
///
/// Errors from the inner service are handed to the [`ErrorHandler`], which
/// renders the response that gets logged and returned. So are [`HttpError`]s
/// a route already rendered, found in the response extensions. The wrapped
/// service itself never fails.
#[derive(Clone)]
pub struct RequestLogLayer<H = DefaultErrorHandler> {
    logger: TracingLogger,
    error_handler: H,
    extractor: IpExtractor,
}

impl RequestLogLayer {
    pub fn new(logger: TracingLogger) -> Self {
        Self {
            logger,
            error_handler: DefaultErrorHandler,
            extractor: IpExtractor::default(),
        }
    }
}

impl<H> RequestLogLayer<H> {
    pub fn error_handler<H2>(self, error_handler: H2) -> RequestLogLayer<H2> {
        RequestLogLayer {
            logger: self.logger,
            error_handler,
            extractor: self.extractor,
        }
    }

    /// Whether `X-Forwarded-For` / `X-Real-IP` are honoured for `remote_ip`.
    pub fn trust_proxy_headers(mut self, trust: bool) -> Self {
        self.extractor = if trust {
            IpExtractor::ProxyHeaders
        } else {
            IpExtractor::DirectAddr
        };
        self
    }
}

impl<S, H: Clone> Layer<S> for RequestLogLayer<H> {
    type Service = RequestLogService<S, H>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService {
            inner,
            logger: self.logger.clone(),
            error_handler: self.error_handler.clone(),
            extractor: self.extractor,
        }
    }
}

#[derive(Clone)]
pub struct RequestLogService<S, H = DefaultErrorHandler> {
    inner: S,
    logger: TracingLogger,
    error_handler: H,
    extractor: IpExtractor,
}

impl<S, H, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogService<S, H>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    S::Error: Into<BoxError>,
    H: ErrorHandler,
    ResBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<LoggedBody<Body>>;
    type Error = Infallible;
    type Future = ResponseFuture<Oneshot<S, Request<ReqBody>>, H>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is driven inside the future so its errors reach the
        // error handler like call errors do.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let entry = RequestLogEntry::from_request(&request, self.extractor);

        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        ResponseFuture {
            inner: inner.oneshot(request),
            start,
            entry,
            logger: self.logger.clone(),
            error_handler: self.error_handler.clone(),
        }
    }
}

pin_project! {
    pub struct ResponseFuture<F, H> {
        #[pin]
        inner: F,
        start: Instant,
        entry: RequestLogEntry,
        logger: TracingLogger,
        error_handler: H,
    }
}

impl<F, H, ResBody, E> Future for ResponseFuture<F, H>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    E: Into<BoxError>,
    H: ErrorHandler,
    ResBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError>,
{
    type Output = Result<Response<LoggedBody<Body>>, Infallible>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut response = match ready!(this.inner.poll(cx)) {
            Ok(mut response) => match response.extensions_mut().remove::<HttpError>() {
                Some(error) => this.error_handler.handle_error(Box::new(error)),
                None => response.map(Body::new),
            },
            Err(err) => this.error_handler.handle_error(err.into()),
        };
        // Handled here; layers further out must not report it again.
        response.extensions_mut().remove::<HttpError>();

        let mut entry = std::mem::take(this.entry);
        entry.latency = this.start.elapsed();
        entry.status = response.status().as_u16();

        let completion = Completion {
            entry: Some(entry),
            logger: this.logger.clone(),
        };
        Poll::Ready(Ok(response.map(|body| LoggedBody { inner: body, completion })))
    }
}

/// Writes the entry exactly once: on end of stream, body error, or drop.
pub(crate) struct Completion {
    entry: Option<RequestLogEntry>,
    logger: TracingLogger,
}

impl Completion {
    fn record(&mut self, bytes: usize) {
        if let Some(entry) = self.entry.as_mut() {
            entry.bytes_out += bytes as u64;
        }
    }

    fn finish(&mut self) {
        if let Some(mut entry) = self.entry.take() {
            entry.time = Local::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            self.logger.log_request(&entry);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish();
    }
}

pin_project! {
    /// Response body that counts the bytes it yields.
    pub struct LoggedBody<B> {
        #[pin]
        inner: B,
        completion: Completion,
    }
}

impl<B> http_body::Body for LoggedBody<B>
where
    B: http_body::Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));
        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.completion.record(data.remaining());
                }
            }
            Some(Err(_)) | None => this.completion.finish(),
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{Logger, Lvl, Output};
    use crate::test_support::Capture;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::sync::{Arc, Mutex};
    use tower::service_fn;

    fn capturing_logger() -> (TracingLogger, Capture) {
        let capture = Capture::default();
        let logger = TracingLogger::builder()
            .output(Output::new(capture.clone()))
            .build()
            .unwrap();
        (logger, capture)
    }

    fn ok_service(
        body: &'static str,
        delay: Duration,
    ) -> impl Service<Request<Body>, Response = Response<Body>, Error = Infallible> + Clone {
        service_fn(move |_req: Request<Body>| async move {
            tokio::time::sleep(delay).await;
            Ok::<_, Infallible>(body.into_response())
        })
    }

    #[tokio::test]
    async fn records_request_fields() {
        let (logger, capture) = capturing_logger();
        let service = RequestLogLayer::new(logger).layer(ok_service("hello", Duration::ZERO));

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/items?page=2")
            .header("host", "example.com")
            .header("referer", "https://ref.example/")
            .header("user-agent", "curl/8.0")
            .header("content-length", "5")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::from("12345"))
            .unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello");

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["message"], "Handled request");
        assert_eq!(line["level"], "INFO");
        assert_eq!(line["remote_ip"], "203.0.113.7");
        assert_eq!(line["host"], "example.com");
        assert_eq!(line["uri"], "/api/v1/items?page=2");
        assert_eq!(line["method"], "POST");
        assert_eq!(line["path"], "/api/v1/items");
        assert_eq!(line["referer"], "https://ref.example/");
        assert_eq!(line["user_agent"], "curl/8.0");
        assert_eq!(line["status"], 200);
        assert_eq!(line["bytes_in"], "5");
        assert_eq!(line["bytes_out"], 5);
        assert!(chrono::DateTime::parse_from_rfc3339(line["time"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn missing_headers_are_empty() {
        let (logger, capture) = capturing_logger();
        let service = RequestLogLayer::new(logger).layer(ok_service("", Duration::ZERO));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        response.into_body().collect().await.unwrap();

        let line = &capture.json_lines()[0];
        assert_eq!(line["remote_ip"], "");
        assert_eq!(line["host"], "");
        assert_eq!(line["referer"], "");
        assert_eq!(line["user_agent"], "");
        assert_eq!(line["bytes_in"], "");
        assert_eq!(line["bytes_out"], 0);
    }

    #[tokio::test]
    async fn non_ascii_headers_are_kept() {
        let (logger, capture) = capturing_logger();
        let service = RequestLogLayer::new(logger).layer(ok_service("", Duration::ZERO));

        let request = Request::builder()
            .uri("/")
            .header(
                "user-agent",
                HeaderValue::from_bytes("Agent/1.0 (ünïcode)".as_bytes()).unwrap(),
            )
            .header(
                "referer",
                HeaderValue::from_bytes("https://ex.com/café".as_bytes()).unwrap(),
            )
            .body(Body::empty())
            .unwrap();
        drop(service.oneshot(request).await.unwrap());

        let line = &capture.json_lines()[0];
        assert_eq!(line["user_agent"], "Agent/1.0 (ünïcode)");
        assert_eq!(line["referer"], "https://ex.com/café");
    }

    #[tokio::test]
    async fn absolute_form_uri_is_logged_as_origin_form() {
        let (logger, capture) = capturing_logger();
        let service = RequestLogLayer::new(logger).layer(ok_service("", Duration::ZERO));

        let request = Request::builder()
            .uri("http://example.com:8080/items?page=2")
            .body(Body::empty())
            .unwrap();
        drop(service.oneshot(request).await.unwrap());

        let line = &capture.json_lines()[0];
        assert_eq!(line["uri"], "/items?page=2");
        assert_eq!(line["path"], "/items");
        assert_eq!(line["host"], "example.com:8080");
    }

    #[tokio::test]
    async fn slow_handler_latency_is_measured() {
        let (logger, capture) = capturing_logger();
        let service =
            RequestLogLayer::new(logger).layer(ok_service("ok", Duration::from_millis(10)));

        let request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        response.into_body().collect().await.unwrap();

        let line = &capture.json_lines()[0];
        assert_eq!(line["status"], 200);
        assert_eq!(line["message"], "Handled request");
        let latency = line["latency"].as_u64().unwrap();
        assert!(latency >= 10_000, "latency {latency}us shorter than the sleep");
        assert!(latency < 1_000_000, "latency {latency}us unreasonably long");
        let human = line["latency_human"].as_str().unwrap();
        assert!(human.ends_with("ms"), "unexpected latency_human {human}");
    }

    #[tokio::test]
    async fn handler_error_goes_to_error_handler() {
        let (logger, capture) = capturing_logger();
        let reported = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = reported.clone();

        let failing = service_fn(|_req: Request<Body>| async {
            Err::<Response<Body>, _>(HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "database unavailable",
            ))
        });
        let service = RequestLogLayer::new(logger)
            .error_handler(move |err: BoxError| {
                sink.lock().unwrap().push(err.to_string());
                DefaultErrorHandler.handle_error(err)
            })
            .layer(failing);

        let request = Request::builder().uri("/fail").body(Body::empty()).unwrap();
        let result = service.oneshot(request).await;

        let response = result.expect("wrapper never reports an error");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        drop(response);

        assert_eq!(*reported.lock().unwrap(), vec!["database unavailable".to_string()]);
        let lines = capture.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["status"], 500);
    }

    #[tokio::test]
    async fn route_errors_reach_error_handler() {
        let (logger, capture) = capturing_logger();
        let reported = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = reported.clone();

        let router = Router::new()
            .route(
                "/fail",
                get(|| async {
                    Err::<&'static str, _>(HttpError::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "db down",
                    ))
                }),
            )
            .route("/ok", get(|| async { "fine" }))
            .layer(RequestLogLayer::new(logger).error_handler(move |err: BoxError| {
                sink.lock().unwrap().push(err.to_string());
                DefaultErrorHandler.handle_error(err)
            }));

        let request = Request::builder().uri("/fail").body(Body::empty()).unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.extensions().get::<HttpError>().is_none());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "db down");

        let request = Request::builder().uri("/ok").body(Body::empty()).unwrap();
        drop(router.oneshot(request).await.unwrap());

        assert_eq!(*reported.lock().unwrap(), vec!["db down".to_string()]);
        let lines = capture.json_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], 503);
        assert_eq!(lines[1]["status"], 200);
    }

    #[tokio::test]
    async fn status_reflects_error_mapping() {
        let (logger, capture) = capturing_logger();
        let failing = service_fn(|_req: Request<Body>| async {
            Err::<Response<Body>, _>(HttpError::new(StatusCode::NOT_FOUND, "no such item"))
        });
        let service = RequestLogLayer::new(logger).layer(failing);

        let request = Request::builder().uri("/items/9").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "no such item");

        let line = &capture.json_lines()[0];
        assert_eq!(line["status"], 404);
        assert_eq!(line["bytes_out"], body.len() as u64);
    }

    #[tokio::test]
    async fn entry_is_written_after_handler_returns() {
        let (logger, capture) = capturing_logger();
        let seen_during_handler = Arc::new(Mutex::new(None));
        let seen = seen_during_handler.clone();
        let observed = capture.clone();

        let service = service_fn(move |_req: Request<Body>| {
            let seen = seen.clone();
            let observed = observed.clone();
            async move {
                *seen.lock().unwrap() = Some(observed.json_lines().len());
                Ok::<_, Infallible>("done".into_response())
            }
        });
        let service = RequestLogLayer::new(logger).layer(service);

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        response.into_body().collect().await.unwrap();

        assert_eq!(*seen_during_handler.lock().unwrap(), Some(0));
        assert_eq!(capture.json_lines().len(), 1);
    }

    #[tokio::test]
    async fn dropped_body_still_logs_once() {
        let (logger, capture) = capturing_logger();
        let service = RequestLogLayer::new(logger).layer(ok_service("unread", Duration::ZERO));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        assert!(capture.json_lines().is_empty());
        drop(response);

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["bytes_out"], 0);
    }

    #[tokio::test]
    async fn streamed_body_counts_every_chunk() {
        let (logger, capture) = capturing_logger();
        let service = service_fn(|_req: Request<Body>| async {
            let chunks = vec![
                Ok::<_, Infallible>(bytes::Bytes::from_static(b"abc")),
                Ok(bytes::Bytes::from_static(b"defgh")),
            ];
            let body = Body::from_stream(futures::stream::iter(chunks));
            Ok::<_, Infallible>(Response::new(body))
        });
        let service = RequestLogLayer::new(logger).layer(service);

        let request = Request::builder().uri("/stream").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"abcdefgh");

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["bytes_out"], 8);
    }

    #[tokio::test]
    async fn concurrent_requests_do_not_mix() {
        let (logger, capture) = capturing_logger();
        let layer = RequestLogLayer::new(logger);

        let slow = layer.layer(ok_service("slow body", Duration::from_millis(40)));
        let fast = layer.layer(service_fn(|_req: Request<Body>| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, Infallible>((StatusCode::CREATED, "fast").into_response())
        }));

        let a = async {
            let request = Request::builder().uri("/a").body(Body::empty()).unwrap();
            let response = slow.oneshot(request).await.unwrap();
            response.into_body().collect().await.unwrap();
        };
        let b = async {
            let request = Request::builder().uri("/b").body(Body::empty()).unwrap();
            let response = fast.oneshot(request).await.unwrap();
            response.into_body().collect().await.unwrap();
        };
        tokio::join!(a, b);

        let lines = capture.json_lines();
        assert_eq!(lines.len(), 2);
        let find = |path: &str| lines.iter().find(|l| l["path"] == path).unwrap().clone();
        let a = find("/a");
        let b = find("/b");

        assert_eq!(lines[0]["path"], "/b", "fast request completes first");
        assert_eq!(a["status"], 200);
        assert_eq!(a["bytes_out"], 9);
        assert!(a["latency"].as_u64().unwrap() >= 40_000);
        assert_eq!(b["status"], 201);
        assert_eq!(b["bytes_out"], 4);
        assert!(b["latency"].as_u64().unwrap() < a["latency"].as_u64().unwrap());
    }

    #[tokio::test]
    async fn logging_respects_level() {
        let (logger, capture) = capturing_logger();
        logger.set_level(Lvl::WARN);
        let service = RequestLogLayer::new(logger).layer(ok_service("", Duration::ZERO));

        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        drop(service.oneshot(request).await.unwrap());

        assert!(capture.json_lines().is_empty());
    }
}
