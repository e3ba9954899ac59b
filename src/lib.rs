use std::sync::Arc;

pub mod config;
pub mod error;
pub mod logger;
pub mod middleware;
pub mod routes;

pub use error::{Error, Result};
pub use logger::{attach, LogFormat, Logger, Lvl, Output, SharedLogger, TracingLogger};
pub use middleware::{
    DefaultErrorHandler, ErrorHandler, HttpError, RequestLogEntry, RequestLogLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// In-memory sink for asserting on emitted lines.
    #[derive(Clone, Default)]
    pub struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        pub fn json_lines(&self) -> Vec<serde_json::Value> {
            self.contents()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
