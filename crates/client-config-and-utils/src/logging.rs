//! Logging initialization for the client.
//!
//! All client components log through `tracing`. Structured JSONL lines go
//! to `~/.commons/logs/client.jsonl` so sessions can be inspected after
//! the fact (`tail -f ... | jq`), with a compact stderr layer for
//! immediate feedback during development.

use crate::Paths;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Append-only writer for the central log file.
/// Flushes per write so concurrent processes interleave whole lines.
#[derive(Clone)]
pub struct AppendLogWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl AppendLogWriter {
    pub fn new(path: &PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl io::Write for AppendLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();
        let result = guard.write(buf);
        guard.flush()?;
        result
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().unwrap().flush()
    }
}

/// MakeWriter implementation for tracing-subscriber.
#[derive(Clone)]
struct WriterFactory {
    writer: AppendLogWriter,
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = AppendLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error),
///   overridable at runtime via `RUST_LOG`.
pub fn init_logging(level: &str) {
    let log_path = Paths::new().ok().map(|paths| paths.log_file());

    let file_layer = log_path.as_ref().and_then(|path| {
        let writer = match AppendLogWriter::new(path) {
            Ok(writer) => writer,
            Err(error) => {
                eprintln!("failed to open log file {:?}: {}", path, error);
                return None;
            }
        };

        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(WriterFactory { writer })
                .with_filter(env_filter(level)),
        )
    });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_writer(io::stderr)
        .with_ansi(true)
        .with_filter(env_filter(level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    if let Some(path) = log_path {
        tracing::info!(log_path = %path.display(), "logging initialized");
    }
}
