//! Backward scanning and batched retrieval of log file lines.
//!
//! A query walks a log file from its end toward its start in fixed-size
//! blocks, keeps the lines that pass an optional substring filter, and hands
//! them to the caller in bounded batches, newest first.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod config;
mod error;
mod filter;
mod registry;
mod retriever;
mod scanner;
mod service;
mod source;

pub use config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_LOG_DIR, DEFAULT_MAX_BATCH_SIZE, DEFAULT_REGISTRY_CAPACITY,
    QueryConfig,
};
pub use error::{Error, Result};
pub use filter::LineFilter;
pub use registry::{FileProcessor, FileRegistry};
pub use retriever::{STOP_CHECK_INTERVAL, Retrieved, retrieve_batch, retrieve_batch_until};
pub use scanner::{Line, ReverseScanner};
pub use service::{Batch, BatchReceiver, QueryParams, QueryService};
pub use source::ByteSource;
