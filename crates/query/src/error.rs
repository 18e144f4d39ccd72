use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while answering a log query.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The requested file name is empty, absolute, or escapes the log directory.
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// The log file could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Resolved path of the file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The log file could not be stat-ed after opening.
    #[error("failed to stat {path}: {source}")]
    Stat {
        /// Resolved path of the file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A block read failed part way through a scan.
    #[error("read failed at offset {offset}: {source}")]
    Read {
        /// File offset the failed block started at.
        offset: u64,
        /// The underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The query worker exited without producing a terminal batch.
    #[error("query worker stopped unexpectedly")]
    WorkerStopped,
}

impl Error {
    /// Whether the error means the requested file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Open { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
