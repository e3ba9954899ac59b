use std::path::PathBuf;

use thiserror::Error;
use tracing::level_filters::ParseLevelFilterError;

use crate::logger::Lvl;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("log level {0} has no tracing equivalent")]
    UnknownLevel(Lvl),

    #[error("invalid log level name: {0}")]
    InvalidLevelName(String),

    #[error(transparent)]
    InvalidLevelFilter(#[from] ParseLevelFilterError),

    #[error("invalid filter directives: {0}")]
    InvalidDirectives(#[from] tracing_subscriber::filter::ParseError),

    #[error("failed to open log output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to reload log level: {0}")]
    Reload(#[from] tracing_subscriber::reload::Error),

    #[error(transparent)]
    GlobalDefault(#[from] tracing::dispatcher::SetGlobalDefaultError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
