//! Tunables for the query service.

use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Default directory log files are resolved against.
pub const DEFAULT_LOG_DIR: &str = "/var/log/";

/// Default number of bytes pulled from the file per read.
pub const DEFAULT_BLOCK_SIZE: NonZeroUsize = NonZeroUsize::new(4096 * 16).unwrap();

/// Default maximum number of lines per emitted batch.
pub const DEFAULT_MAX_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(320).unwrap();

/// Default number of file entries kept in the registry.
pub const DEFAULT_REGISTRY_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).unwrap();

/// Configuration for [`QueryService`](crate::QueryService).
#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Directory every requested file name is resolved under.
    pub log_dir: PathBuf,

    /// Bytes read per backward step.
    pub block_size: NonZeroUsize,

    /// Upper bound on lines per batch.
    pub max_batch_size: NonZeroUsize,

    /// Number of per-file entries the registry keeps before evicting the
    /// least recently queried one.
    pub registry_capacity: NonZeroUsize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            block_size: DEFAULT_BLOCK_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

impl QueryConfig {
    /// Creates a config with defaults, rooted at `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the block size.
    #[must_use]
    pub const fn with_block_size(mut self, block_size: NonZeroUsize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn with_max_batch_size(mut self, max_batch_size: NonZeroUsize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the registry capacity.
    #[must_use]
    pub const fn with_registry_capacity(mut self, registry_capacity: NonZeroUsize) -> Self {
        self.registry_capacity = registry_capacity;
        self
    }
}
