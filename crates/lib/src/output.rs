//! Output file handling: clearing stale files and writing new ones.

use crate::errors::FetchError;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Permission bits for every written output file.
pub const OUTPUT_FILE_MODE: u32 = 0o644;

/// What happened when clearing a previously written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
    Failed,
}

impl RemoveOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoveOutcome::Removed => "removed",
            RemoveOutcome::NotFound => "not_found",
            RemoveOutcome::Failed => "failed",
        }
    }
}

/// Removes a previously written output file.
///
/// Never fails: a missing file is expected, and any other failure is logged
/// because the following write truncates the file anyway.
pub async fn remove_stale(path: &Path) -> RemoveOutcome {
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("{} successfully deleted", path.display());
            RemoveOutcome::Removed
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} not present, nothing to delete", path.display());
            RemoveOutcome::NotFound
        }
        Err(e) => {
            warn!("Error deleting file {}: {e}", path.display());
            RemoveOutcome::Failed
        }
    }
}

/// Writes `bytes` to `path`, truncating any existing content.
///
/// New files are created with mode `0644` on unix.
pub async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    let write_err = |source| FetchError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(OUTPUT_FILE_MODE);

    let mut file = options.open(path).await.map_err(write_err)?;
    file.write_all(bytes).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    Ok(())
}
