//! `tracing`-backed logger that satisfies the framework-facing [`Logger`]
//! contract.
//!
//! A [`TracingLogger`] owns its own [`Dispatch`]; every event it emits is
//! routed there with [`dispatcher::with_default`], so nothing depends on a
//! process-wide subscriber unless [`TracingLogger::install_global`] is called.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use axum::{Extension, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::dispatcher::{self, Dispatch};
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{fmt as tfmt, reload, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use crate::middleware::logging::{RequestLogEntry, RequestLogLayer};

mod level;
mod output;

pub use level::Lvl;
pub use output::Output;

use output::OutputSlot;

/// Structured payload accepted by the `*j` emission methods.
pub type Json = Map<String, Value>;

/// Logger handle shared with request handlers through an axum [`Extension`].
pub type SharedLogger = Arc<dyn Logger>;

/// Capability set the web framework expects from its logger.
pub trait Logger: Send + Sync {
    fn output(&self) -> Output;
    fn set_output(&self, output: Output);

    /// Always empty; per-line prefixes are not supported.
    fn prefix(&self) -> String;
    /// No-op.
    fn set_prefix(&self, prefix: &str);
    /// No-op.
    fn set_header(&self, header: &str);

    fn level(&self) -> Lvl;
    fn set_level(&self, lvl: Lvl);

    fn print(&self, args: fmt::Arguments<'_>);
    fn printj(&self, j: Json);
    fn debug(&self, args: fmt::Arguments<'_>);
    fn debugj(&self, j: Json);
    fn info(&self, args: fmt::Arguments<'_>);
    fn infoj(&self, j: Json);
    fn warn(&self, args: fmt::Arguments<'_>);
    fn warnj(&self, j: Json);
    fn error(&self, args: fmt::Arguments<'_>);
    fn errorj(&self, j: Json);
    fn fatal(&self, args: fmt::Arguments<'_>) -> !;
    fn fatalj(&self, j: Json) -> !;
    fn panic(&self, args: fmt::Arguments<'_>) -> !;
    fn panicj(&self, j: Json) -> !;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Clone)]
pub struct TracingLogger {
    inner: Arc<Inner>,
}

struct Inner {
    dispatch: Dispatch,
    level: reload::Handle<LevelFilter, Registry>,
    output: OutputSlot,
}

impl TracingLogger {
    /// JSON lines to stdout at INFO.
    pub fn new() -> Self {
        Self::assemble(LevelFilter::INFO, LogFormat::Json, Output::stdout(), None)
    }

    pub fn builder() -> TracingLoggerBuilder {
        TracingLoggerBuilder::default()
    }

    pub fn from_config(config: &LoggingConfig) -> Result<Self> {
        let mut builder = Self::builder()
            .level(config.level.parse::<LevelFilter>()?)
            .format(config.format)
            .output(Output::from_target(&config.output)?);
        if let Some(directives) = &config.directives {
            builder = builder.directives(directives);
        }
        builder.build()
    }

    fn assemble(
        level: LevelFilter,
        format: LogFormat,
        output: Output,
        directives: Option<EnvFilter>,
    ) -> Self {
        let output = OutputSlot::new(output);
        let (level_layer, level) = reload::Layer::new(level);
        let directives = directives.unwrap_or_else(|| EnvFilter::new("trace"));
        let subscriber = tracing_subscriber::registry()
            .with(level_layer)
            .with(directives);

        let dispatch = match format {
            LogFormat::Json => Dispatch::new(
                subscriber.with(
                    tfmt::layer()
                        .json()
                        .flatten_event(true)
                        .with_current_span(false)
                        .with_span_list(false)
                        .with_writer(output.clone()),
                ),
            ),
            LogFormat::Text => Dispatch::new(
                subscriber.with(
                    tfmt::layer()
                        .with_ansi(false)
                        .with_writer(output.clone()),
                ),
            ),
        };

        Self {
            inner: Arc::new(Inner {
                dispatch,
                level,
                output,
            }),
        }
    }

    /// Makes this logger the process-wide default subscriber, so plain
    /// `tracing` macros outside the adapter land in the same sink.
    pub fn install_global(&self) -> Result<()> {
        dispatcher::set_global_default(self.inner.dispatch.clone())?;
        Ok(())
    }

    /// Like [`Logger::set_level`] but refuses unmapped levels.
    pub fn try_set_level(&self, lvl: Lvl) -> Result<()> {
        if !lvl.is_mapped() {
            return Err(Error::UnknownLevel(lvl));
        }
        self.inner.level.reload(lvl.to_filter())?;
        Ok(())
    }

    pub fn level_filter(&self) -> LevelFilter {
        self.inner
            .level
            .with_current(|filter| *filter)
            .unwrap_or(LevelFilter::OFF)
    }

    /// Middleware hook recording one entry per request.
    pub fn hook(&self) -> RequestLogLayer {
        RequestLogLayer::new(self.clone())
    }

    /// Registers the hook and exposes the logger to handlers as an
    /// `Extension<SharedLogger>`.
    pub fn register<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let shared: SharedLogger = Arc::new(self.clone());
        router.layer(self.hook()).layer(Extension(shared))
    }

    pub(crate) fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.inner.dispatch, f)
    }

    pub(crate) fn log_request(&self, entry: &RequestLogEntry) {
        let latency_human = entry.latency_human();
        self.scoped(|| {
            info!(
                time = entry.time.as_str(),
                remote_ip = entry.remote_ip.as_str(),
                host = entry.host.as_str(),
                uri = entry.uri.as_str(),
                method = entry.method.as_str(),
                path = entry.path.as_str(),
                referer = entry.referer.as_str(),
                user_agent = entry.user_agent.as_str(),
                status = entry.status,
                latency = entry.latency_micros(),
                latency_human = latency_human.as_str(),
                bytes_in = entry.bytes_in.as_str(),
                bytes_out = entry.bytes_out,
                "Handled request"
            )
        });
    }

    fn flush(&self) {
        let _ = self.inner.output.get().flush();
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TracingLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingLogger")
            .field("level", &self.level_filter())
            .field("output", &self.inner.output.get())
            .finish()
    }
}

impl Logger for TracingLogger {
    fn output(&self) -> Output {
        self.inner.output.get()
    }

    fn set_output(&self, output: Output) {
        self.inner.output.set(output);
    }

    fn prefix(&self) -> String {
        String::new()
    }

    fn set_prefix(&self, _prefix: &str) {}

    fn set_header(&self, _header: &str) {}

    fn level(&self) -> Lvl {
        Lvl::from_filter(self.level_filter())
    }

    fn set_level(&self, lvl: Lvl) {
        if let Err(err) = self.inner.level.reload(lvl.to_filter()) {
            warn!(error = %err, level = %lvl, "log level unchanged");
        }
    }

    fn print(&self, args: fmt::Arguments<'_>) {
        self.info(args);
    }

    fn printj(&self, j: Json) {
        self.infoj(j);
    }

    fn debug(&self, args: fmt::Arguments<'_>) {
        self.scoped(|| debug!("{}", args));
    }

    fn debugj(&self, j: Json) {
        let fields = Value::Object(j);
        self.scoped(|| debug!(fields = %fields));
    }

    fn info(&self, args: fmt::Arguments<'_>) {
        self.scoped(|| info!("{}", args));
    }

    fn infoj(&self, j: Json) {
        let fields = Value::Object(j);
        self.scoped(|| info!(fields = %fields));
    }

    fn warn(&self, args: fmt::Arguments<'_>) {
        self.scoped(|| warn!("{}", args));
    }

    fn warnj(&self, j: Json) {
        let fields = Value::Object(j);
        self.scoped(|| warn!(fields = %fields));
    }

    fn error(&self, args: fmt::Arguments<'_>) {
        self.scoped(|| error!("{}", args));
    }

    fn errorj(&self, j: Json) {
        let fields = Value::Object(j);
        self.scoped(|| error!(fields = %fields));
    }

    fn fatal(&self, args: fmt::Arguments<'_>) -> ! {
        self.scoped(|| error!(fatal = true, "{}", args));
        self.flush();
        std::process::exit(1)
    }

    fn fatalj(&self, j: Json) -> ! {
        let fields = Value::Object(j);
        self.scoped(|| error!(fatal = true, fields = %fields));
        self.flush();
        std::process::exit(1)
    }

    fn panic(&self, args: fmt::Arguments<'_>) -> ! {
        let message = args.to_string();
        self.scoped(|| error!(panic = true, "{}", message));
        panic!("{}", message)
    }

    fn panicj(&self, j: Json) -> ! {
        let fields = Value::Object(j);
        self.scoped(|| error!(panic = true, fields = %fields));
        panic!("{}", fields)
    }
}

#[derive(Debug, Default)]
pub struct TracingLoggerBuilder {
    level: Option<LevelFilter>,
    format: LogFormat,
    output: Option<Output>,
    directives: Option<String>,
}

impl TracingLoggerBuilder {
    pub fn level(mut self, level: LevelFilter) -> Self {
        self.level = Some(level);
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.output = Some(output);
        self
    }

    /// `EnvFilter` directives (e.g. `hyper=warn`) applied on top of the level.
    pub fn directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn build(self) -> Result<TracingLogger> {
        let directives = self
            .directives
            .as_deref()
            .map(EnvFilter::try_new)
            .transpose()?;
        Ok(TracingLogger::assemble(
            self.level.unwrap_or(LevelFilter::INFO),
            self.format,
            self.output.unwrap_or_else(Output::stdout),
            directives,
        ))
    }
}

/// Creates a default logger and registers it on `router` in one call.
pub fn attach<S>(router: Router<S>) -> (Router<S>, TracingLogger)
where
    S: Clone + Send + Sync + 'static,
{
    let logger = TracingLogger::new();
    let router = logger.register(router);
    (router, logger)
}
