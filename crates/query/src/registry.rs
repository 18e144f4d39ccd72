//! Service-scoped registry of per-file processors.
//!
//! Entries are created on the first query for a file name and evicted in
//! least-recently-queried order once the configured capacity is reached.
//! Scanners are never stored here; each query builds its own.

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Per-file state shared by every query against the same file name.
#[derive(Debug)]
pub struct FileProcessor {
    file_name: String,
    path: PathBuf,
    queries: AtomicU64,
    last_size: AtomicU64,
}

impl FileProcessor {
    fn new(file_name: String, path: PathBuf) -> Self {
        Self {
            file_name,
            path,
            queries: AtomicU64::new(0),
            last_size: AtomicU64::new(0),
        }
    }

    /// The file name as requested.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// The resolved path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the file has been opened for a query.
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// File size observed by the most recent open.
    pub fn last_size(&self) -> u64 {
        self.last_size.load(Ordering::Relaxed)
    }

    /// Opens the file and returns it along with its current size.
    ///
    /// The handle is owned by the caller and closed when dropped.
    pub fn open_and_stat(&self) -> Result<(File, u64)> {
        let file = File::open(&self.path).map_err(|e| Error::Open {
            path: self.path.clone(),
            source: Arc::new(e),
        })?;

        let size = file
            .metadata()
            .map_err(|e| Error::Stat {
                path: self.path.clone(),
                source: Arc::new(e),
            })?
            .len();

        self.queries.fetch_add(1, Ordering::Relaxed);
        self.last_size.store(size, Ordering::Relaxed);

        Ok((file, size))
    }
}

/// Maps file names to their [`FileProcessor`].
#[derive(Debug)]
pub struct FileRegistry {
    log_dir: PathBuf,
    processors: Mutex<LruCache<String, Arc<FileProcessor>>>,
}

impl FileRegistry {
    /// Creates an empty registry resolving names under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>, capacity: NonZeroUsize) -> Self {
        Self {
            log_dir: log_dir.into(),
            processors: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the processor for `file_name`, creating it if needed.
    pub fn get_or_create(&self, file_name: &str) -> Result<Arc<FileProcessor>> {
        let path = resolve(&self.log_dir, file_name)?;

        let mut processors = self.processors.lock();
        if let Some(processor) = processors.get(file_name) {
            return Ok(processor.clone());
        }

        debug!(file_name, path = %path.display(), "registering file processor");
        let processor = Arc::new(FileProcessor::new(file_name.to_string(), path));
        if let Some((evicted, _)) = processors.push(file_name.to_string(), processor.clone())
            && evicted != file_name
        {
            debug!(file_name = %evicted, "evicted file processor");
        }

        Ok(processor)
    }

    /// Returns the processor for `file_name` without creating one.
    pub fn get(&self, file_name: &str) -> Option<Arc<FileProcessor>> {
        self.processors.lock().peek(file_name).cloned()
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.processors.lock().len()
    }

    /// Whether no file has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Joins `file_name` onto `log_dir`, refusing names that would leave it.
fn resolve(log_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    let escapes = relative.components().any(|component| {
        matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });

    if file_name.is_empty() || escapes {
        return Err(Error::InvalidFileName(file_name.to_string()));
    }

    Ok(log_dir.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::TempDir;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = Path::new("/var/log");
        assert!(matches!(resolve(dir, ""), Err(Error::InvalidFileName(_))));
        assert!(matches!(
            resolve(dir, "../etc/passwd"),
            Err(Error::InvalidFileName(_))
        ));
        assert!(matches!(
            resolve(dir, "/etc/passwd"),
            Err(Error::InvalidFileName(_))
        ));
        assert_eq!(
            resolve(dir, "nginx/access.log").unwrap(),
            PathBuf::from("/var/log/nginx/access.log")
        );
    }

    #[test]
    fn test_processor_is_reused() {
        let registry = FileRegistry::new("/var/log", nz(4));
        let first = registry.get_or_create("syslog").unwrap();
        let second = registry.get_or_create("syslog").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_least_recent_entry_evicted() {
        let registry = FileRegistry::new("/var/log", nz(2));
        registry.get_or_create("a.log").unwrap();
        registry.get_or_create("b.log").unwrap();
        registry.get_or_create("a.log").unwrap();
        registry.get_or_create("c.log").unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("a.log").is_some());
        assert!(registry.get("b.log").is_none());
        assert!(registry.get("c.log").is_some());
    }

    #[test]
    fn test_open_and_stat_records_size() {
        let dir = TempDir::new().unwrap();
        let mut file = File::create(dir.path().join("app.log")).unwrap();
        file.write_all(b"hello\nworld\n").unwrap();
        file.flush().unwrap();

        let registry = FileRegistry::new(dir.path(), nz(4));
        let processor = registry.get_or_create("app.log").unwrap();
        let (_file, size) = processor.open_and_stat().unwrap();

        assert_eq!(size, 12);
        assert_eq!(processor.last_size(), 12);
        assert_eq!(processor.queries(), 1);
    }

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::new(dir.path(), nz(4));
        let processor = registry.get_or_create("missing.log").unwrap();
        let err = processor.open_and_stat().unwrap_err();
        assert!(err.is_not_found());
    }
}
