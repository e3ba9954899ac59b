use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing_subscriber::fmt::MakeWriter;

use crate::error::{Error, Result};

/// Shared handle to the sink log lines are written to.
///
/// Clones point at the same sink. A whole formatted line goes out under a
/// single lock, so concurrent requests never interleave within a line.
#[derive(Clone)]
pub struct Output {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Output {
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Opens `path` for appending, creating it when missing.
    pub fn file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| Error::Output {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(file))
    }

    /// Resolves the `logging.output` configuration value.
    pub fn from_target(target: &str) -> Result<Self> {
        match target {
            "" | "stdout" => Ok(Self::stdout()),
            "stderr" => Ok(Self::stderr()),
            path => Self::file(path),
        }
    }

    pub fn ptr_eq(&self, other: &Output) -> bool {
        Arc::ptr_eq(&self.sink, &other.sink)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("sink", &Arc::as_ptr(&self.sink))
            .finish()
    }
}

/// The logger's current output, swappable at runtime.
#[derive(Clone, Debug)]
pub(crate) struct OutputSlot {
    current: Arc<RwLock<Output>>,
}

impl OutputSlot {
    pub(crate) fn new(output: Output) -> Self {
        Self {
            current: Arc::new(RwLock::new(output)),
        }
    }

    pub(crate) fn get(&self) -> Output {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set(&self, output: Output) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = output;
    }
}

impl<'a> MakeWriter<'a> for OutputSlot {
    type Writer = Output;

    fn make_writer(&'a self) -> Self::Writer {
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Capture;

    #[test]
    fn clones_share_the_sink() {
        let capture = Capture::default();
        let output = Output::new(capture.clone());
        let mut clone = output.clone();

        clone.write_all(b"hello\n").unwrap();

        assert!(output.ptr_eq(&clone));
        assert_eq!(capture.contents(), "hello\n");
    }

    #[test]
    fn slot_swaps_writers() {
        let first = Capture::default();
        let second = Capture::default();
        let slot = OutputSlot::new(Output::new(first.clone()));

        slot.make_writer().write_all(b"one\n").unwrap();
        let replacement = Output::new(second.clone());
        slot.set(replacement.clone());
        slot.make_writer().write_all(b"two\n").unwrap();

        assert!(slot.get().ptr_eq(&replacement));
        assert_eq!(first.contents(), "one\n");
        assert_eq!(second.contents(), "two\n");
    }

    #[test]
    fn file_output_appends() {
        let path = std::env::temp_dir().join(format!(
            "request-logger-output-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        Output::file(&path).unwrap().write_all(b"a\n").unwrap();
        Output::from_target(path.to_str().unwrap())
            .unwrap()
            .write_all(b"b\n")
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_directory_is_reported() {
        let err = Output::file("/nonexistent-dir/request.log").unwrap_err();
        assert!(matches!(err, Error::Output { .. }));
    }
}
