//! # Logging Setup
//!
//! Installs the global `tracing` subscriber: a size/age rotated log file plus
//! an optional console layer on stderr. Standard output is left for the
//! document itself.

use crate::errors::LoggingError;
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const DEFAULT_LOG_FILE: &str = "focusterms.log";
/// Rotate once the active segment grows past 1 MiB.
pub const DEFAULT_MAX_SIZE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_MAX_AGE_DAYS: i64 = 365;

/// Where and how log lines are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub file: PathBuf,
    pub max_size_bytes: usize,
    pub max_age_days: i64,
    /// Also write log lines to stderr.
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_LOG_FILE),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            console: true,
        }
    }
}

/// Opens the rotating log writer in append mode.
///
/// Old segments get a timestamp suffix and are pruned by age only, so the
/// number of backups is unbounded.
pub fn rotating_writer(options: &LogOptions) -> Result<FileRotate<AppendTimestamp>, LoggingError> {
    ensure_parent(&options.file)?;
    Ok(FileRotate::new(
        &options.file,
        AppendTimestamp::default(FileLimit::Age(chrono::Duration::days(
            options.max_age_days,
        ))),
        ContentLimit::BytesSurpassed(options.max_size_bytes),
        Compression::None,
        #[cfg(unix)]
        None,
    ))
}

fn ensure_parent(path: &Path) -> Result<(), LoggingError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            std::fs::create_dir_all(dir).map_err(|source| LoggingError::LogDir {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// A shared rotating log file usable as a `tracing-subscriber` writer.
///
/// Each event is flushed as soon as it is written, since the global
/// subscriber is never dropped.
pub struct RotatingLog(Mutex<FileRotate<AppendTimestamp>>);

impl RotatingLog {
    pub fn open(options: &LogOptions) -> Result<Self, LoggingError> {
        Ok(Self(Mutex::new(rotating_writer(options)?)))
    }
}

pub struct RotatingLogWriter<'a>(MutexGuard<'a, FileRotate<AppendTimestamp>>);

impl Write for RotatingLogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Drop for RotatingLogWriter<'_> {
    fn drop(&mut self) {
        let _ = self.0.flush();
    }
}

impl<'a> MakeWriter<'a> for RotatingLog {
    type Writer = RotatingLogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RotatingLogWriter(self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Installs the global subscriber.
///
/// `span_events` reports span open and close events on the console layer; it
/// is how traced runs make their spans visible.
pub fn init_logging(options: &LogOptions, span_events: bool) -> Result<(), LoggingError> {
    let file_layer = fmt::layer()
        .with_writer(RotatingLog::open(options)?)
        .with_ansi(false)
        .with_target(false);

    let console_layer = options.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_span_events(if span_events {
                FmtSpan::NEW | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .boxed()
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;
    Ok(())
}
