use std::path::PathBuf;
use thiserror::Error;

/// Custom error types for a metadata fetch run.
///
/// Every variant is fatal for the run. A stale output file that does not exist
/// is not represented here because it is not an error.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Error getting working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
    #[error("Error creating HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("Error making HTTP request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("Metadata endpoint {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Error reading response body: {0}")]
    ReadBody(#[source] reqwest::Error),
    #[error("Error parsing JSON data: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Error parsing JSON data: expected an object, found {0}")]
    NotAnObject(&'static str),
    #[error("Error pretty-printing JSON: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Error decoding base64 content: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Error writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The coarse failure class of a [`FetchError`], one per failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    WorkingDir,
    Network,
    Parse,
    Encode,
    Write,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::WorkingDir(_) => ErrorKind::WorkingDir,
            FetchError::ClientBuild(_)
            | FetchError::Request(_)
            | FetchError::Status { .. }
            | FetchError::ReadBody(_) => ErrorKind::Network,
            FetchError::Parse(_) | FetchError::NotAnObject(_) | FetchError::Base64(_) => {
                ErrorKind::Parse
            }
            FetchError::Encode(_) => ErrorKind::Encode,
            FetchError::Write { .. } => ErrorKind::Write,
        }
    }

    /// `true` if the request timed out before a full response arrived.
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Request(e) | FetchError::ReadBody(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Errors raised while installing the log subscriber.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}
