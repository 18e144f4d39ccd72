//! Query orchestration: opens a file, scans it backward, and hands batches
//! to the caller through a bounded channel.

use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::filter::LineFilter;
use crate::registry::FileRegistry;
use crate::retriever::retrieve_batch_until;
use crate::scanner::ReverseScanner;
use crate::source::ByteSource;

/// Parameters of a single log query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    /// File name relative to the log directory.
    pub file_name: String,

    /// Number of matching lines wanted; 0 scans the whole file.
    pub last_n_events: u64,

    /// Only lines containing this string are returned.
    pub include_filter: Option<String>,
}

impl QueryParams {
    /// Whole-file query for `file_name` without a filter.
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    /// Limits the query to the last `n` matching lines.
    #[must_use]
    pub const fn last_n(mut self, n: u64) -> Self {
        self.last_n_events = n;
        self
    }

    /// Keeps only lines containing `pattern`.
    #[must_use]
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include_filter = Some(pattern.into());
        self
    }
}

/// A group of lines delivered together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    /// Lines, newest first.
    pub lines: Vec<String>,

    /// Set on the last batch of a successful query. Carries no lines.
    pub is_final: bool,
}

impl Batch {
    const fn lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            is_final: false,
        }
    }

    const fn finished() -> Self {
        Self {
            lines: Vec::new(),
            is_final: true,
        }
    }
}

/// Receiving end of a query. Yields batches until a final batch or an error.
pub type BatchReceiver = mpsc::Receiver<Result<Batch>>;

/// Answers log queries against files under the configured log directory.
#[derive(Clone, Debug)]
pub struct QueryService {
    config: Arc<QueryConfig>,
    registry: Arc<FileRegistry>,
}

impl QueryService {
    /// Creates a service with its own file registry.
    pub fn new(config: QueryConfig) -> Self {
        let registry = Arc::new(FileRegistry::new(
            config.log_dir.clone(),
            config.registry_capacity,
        ));
        Self::with_registry(config, registry)
    }

    /// Creates a service sharing an existing registry.
    pub fn with_registry(config: QueryConfig, registry: Arc<FileRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    /// The service configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// The registry of files queried so far.
    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    /// Starts a query on the blocking pool and returns the batch stream.
    ///
    /// The worker stops when `cancel` fires or the receiver is dropped. The
    /// stream ends with exactly one terminal item: a batch with `is_final`
    /// set, or an error.
    pub fn query(&self, params: QueryParams, cancel: CancellationToken) -> BatchReceiver {
        // Capacity 1 keeps the scanner at most one batch ahead of the consumer.
        let (tx, rx) = mpsc::channel(1);
        let service = self.clone();

        tokio::task::spawn_blocking(move || {
            let sink = Sink { tx, cancel };
            service.run(&params, &sink);
        });

        rx
    }

    /// Runs a query to completion and returns every delivered line in order.
    pub async fn collect(&self, params: QueryParams) -> Result<Vec<String>> {
        let mut rx = self.query(params, CancellationToken::new());
        let mut lines = Vec::new();

        while let Some(item) = rx.recv().await {
            let batch = item?;
            if batch.is_final {
                return Ok(lines);
            }
            lines.extend(batch.lines);
        }

        Err(Error::WorkerStopped)
    }

    fn run(&self, params: &QueryParams, sink: &Sink) {
        let processor = match self.registry.get_or_create(&params.file_name) {
            Ok(processor) => processor,
            Err(e) => {
                warn!(file_name = %params.file_name, error = %e, "rejected query");
                sink.send(Err(e));
                return;
            }
        };

        let (file, size) = match processor.open_and_stat() {
            Ok(opened) => opened,
            Err(e) => {
                warn!(file_name = %params.file_name, error = %e, "failed to open log file");
                sink.send(Err(e));
                return;
            }
        };

        info!(
            file_name = %params.file_name,
            size,
            last_n_events = params.last_n_events,
            include_filter = ?params.include_filter,
            "starting query"
        );

        let mut scanner = ReverseScanner::new(file, size, self.config.block_size);
        let filter = LineFilter::include(params.include_filter.clone());

        let outcome = if params.last_n_events == 0 {
            self.scan_whole_file(&mut scanner, &filter, sink)
        } else {
            self.scan_last_n(&mut scanner, &filter, params.last_n_events, sink)
        };

        match outcome {
            Outcome::Done(delivered) => {
                info!(
                    file_name = %params.file_name,
                    delivered,
                    queries = processor.queries(),
                    last_size = processor.last_size(),
                    "query complete"
                );
            }
            Outcome::Failed(e) => {
                warn!(file_name = %params.file_name, error = %e, "query failed");
                sink.send(Err(e));
            }
            Outcome::Abandoned => {
                debug!(file_name = %params.file_name, "query abandoned by consumer");
            }
        }
        // `scanner`, and with it the file handle, drops here on every path.
    }

    fn scan_whole_file<S: ByteSource>(
        &self,
        scanner: &mut ReverseScanner<S>,
        filter: &LineFilter,
        sink: &Sink,
    ) -> Outcome {
        let mut delivered = 0u64;

        loop {
            if sink.is_cancelled() {
                return Outcome::Abandoned;
            }

            let retrieved = match retrieve_batch_until(
                scanner,
                filter,
                self.config.max_batch_size,
                || sink.is_cancelled(),
            ) {
                Ok(Some(retrieved)) => retrieved,
                Ok(None) => return Outcome::Abandoned,
                Err(e) => return Outcome::Failed(e),
            };

            delivered += retrieved.lines.len() as u64;
            if !retrieved.lines.is_empty() && !sink.send(Ok(Batch::lines(retrieved.lines))) {
                return Outcome::Abandoned;
            }

            if retrieved.end_of_file {
                return sink.finish(delivered);
            }
        }
    }

    fn scan_last_n<S: ByteSource>(
        &self,
        scanner: &mut ReverseScanner<S>,
        filter: &LineFilter,
        last_n_events: u64,
        sink: &Sink,
    ) -> Outcome {
        let mut remaining = last_n_events;

        while remaining > 0 {
            if sink.is_cancelled() {
                return Outcome::Abandoned;
            }

            let wanted = usize::try_from(remaining)
                .ok()
                .and_then(NonZeroUsize::new)
                .map_or(self.config.max_batch_size, |n| {
                    n.min(self.config.max_batch_size)
                });

            let retrieved = match retrieve_batch_until(
                scanner,
                filter,
                wanted,
                || sink.is_cancelled(),
            ) {
                Ok(Some(retrieved)) => retrieved,
                Ok(None) => return Outcome::Abandoned,
                Err(e) => return Outcome::Failed(e),
            };

            remaining = remaining.saturating_sub(retrieved.lines.len() as u64);
            if !retrieved.lines.is_empty() && !sink.send(Ok(Batch::lines(retrieved.lines))) {
                return Outcome::Abandoned;
            }

            if retrieved.end_of_file {
                debug!(remaining, "reached start of file before budget");
                break;
            }
        }

        sink.finish(last_n_events - remaining)
    }
}

enum Outcome {
    Done(u64),
    Failed(Error),
    Abandoned,
}

/// Producer side of the handoff channel.
struct Sink {
    tx: mpsc::Sender<Result<Batch>>,
    cancel: CancellationToken,
}

impl Sink {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Blocks until the consumer takes `item`. Returns false if it is gone.
    fn send(&self, item: Result<Batch>) -> bool {
        if let Ok(batch) = &item {
            debug!(lines = batch.lines.len(), is_final = batch.is_final, "sending batch");
        }
        self.tx.blocking_send(item).is_ok()
    }

    fn finish(&self, delivered: u64) -> Outcome {
        if self.send(Ok(Batch::finished())) {
            Outcome::Done(delivered)
        } else {
            Outcome::Abandoned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::path::Path;

    use tempfile::TempDir;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn write_log(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
    }

    fn numbered(count: usize) -> String {
        (1..=count).map(|i| format!("line {i}\n")).collect()
    }

    fn service(dir: &Path, batch: usize) -> QueryService {
        QueryService::new(
            QueryConfig::new(dir)
                .with_block_size(nz(16))
                .with_max_batch_size(nz(batch)),
        )
    }

    async fn batches(rx: &mut BatchReceiver) -> Vec<Result<Batch>> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_whole_file_batches_then_final() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "app.log", &numbered(7));

        let service = service(dir.path(), 3);
        let mut rx = service.query(QueryParams::new("app.log"), CancellationToken::new());
        let items = batches(&mut rx).await;

        let sizes: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().lines.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1, 0]);

        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.is_final);
        assert!(items[..3].iter().all(|i| !i.as_ref().unwrap().is_final));
        assert_eq!(items[0].as_ref().unwrap().lines[0], "line 7");
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_empty_batch() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "app.log", &numbered(6));

        let service = service(dir.path(), 3);
        let mut rx = service.query(QueryParams::new("app.log"), CancellationToken::new());
        let items = batches(&mut rx).await;

        let sizes: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().lines.len())
            .collect();
        assert_eq!(sizes, vec![3, 3, 0]);
    }

    #[tokio::test]
    async fn test_last_n_stops_at_budget() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "app.log", &numbered(100));

        let service = service(dir.path(), 4);
        let mut rx = service.query(
            QueryParams::new("app.log").last_n(10),
            CancellationToken::new(),
        );
        let items = batches(&mut rx).await;

        let sizes: Vec<_> = items
            .iter()
            .map(|item| item.as_ref().unwrap().lines.len())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2, 0]);
        assert!(items.last().unwrap().as_ref().unwrap().is_final);

        let lines: Vec<String> = items
            .into_iter()
            .flat_map(|item| item.unwrap().lines)
            .collect();
        let expected: Vec<String> = (91..=100).rev().map(|i| format!("line {i}")).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_missing_file_yields_single_error() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path(), 4);
        let mut rx = service.query(QueryParams::new("nope.log"), CancellationToken::new());
        let items = batches(&mut rx).await;

        assert_eq!(items.len(), 1);
        assert!(items[0].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_before_io() {
        let dir = TempDir::new().unwrap();
        let service = service(dir.path(), 4);
        let err = service
            .collect(QueryParams::new("../secret"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidFileName(_)));
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_query_stops_early() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "big.log", &numbered(1000));

        let service = service(dir.path(), 2);
        let cancel = CancellationToken::new();
        let mut rx = service.query(QueryParams::new("big.log"), cancel.clone());

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.lines, vec!["line 1000", "line 999"]);

        cancel.cancel();
        let rest = batches(&mut rx).await;

        // At most the batch already in flight, and never a final marker.
        assert!(rest.len() <= 2);
        assert!(rest.iter().all(|item| !item.as_ref().unwrap().is_final));
    }

    #[tokio::test]
    async fn test_read_error_after_batches_is_terminal() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "rotating.log", &numbered(500));

        let service = service(dir.path(), 1);
        let mut rx = service.query(QueryParams::new("rotating.log"), CancellationToken::new());

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.lines, vec!["line 500"]);

        // Shrink the file under the open handle; later block reads fall past its end.
        std::fs::OpenOptions::new()
            .write(true)
            .open(dir.path().join("rotating.log"))
            .unwrap()
            .set_len(10)
            .unwrap();

        let rest = batches(&mut rx).await;
        let errors = rest.iter().filter(|item| item.is_err()).count();
        let finals = rest
            .iter()
            .filter(|item| item.as_ref().is_ok_and(|batch| batch.is_final))
            .count();

        assert_eq!(errors, 1);
        assert_eq!(finals, 0);
        assert!(matches!(rest.last(), Some(Err(Error::Read { .. }))));
    }

    #[tokio::test]
    async fn test_dropped_receiver_releases_worker() {
        let dir = TempDir::new().unwrap();
        write_log(dir.path(), "big.log", &numbered(1000));

        let service = service(dir.path(), 1);
        let mut rx = service.query(QueryParams::new("big.log"), CancellationToken::new());
        let _ = rx.recv().await;
        drop(rx);

        // A fresh query on the same file still completes.
        let lines = service
            .collect(QueryParams::new("big.log").last_n(3))
            .await
            .unwrap();
        assert_eq!(lines, vec!["line 1000", "line 999", "line 998"]);
        assert_eq!(service.registry().get("big.log").unwrap().queries(), 2);
    }
}
