//! Backward line scanner over a random-access byte source.
//!
//! The scanner starts at the end of the source and pulls fixed-size blocks
//! toward the beginning, stitching lines that straddle block boundaries back
//! together. Lines come out newest first.

use std::num::NonZeroUsize;
use std::sync::Arc;

use memchr::memrchr;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::source::ByteSource;

/// A single line read from the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// Line contents without the terminating newline.
    pub text: String,

    /// File offset of the line's first byte.
    pub offset: u64,
}

#[derive(Debug)]
enum ScanState {
    Active,
    /// The cursor reached offset 0. No further reads happen.
    Exhausted,
    Failed(Error),
}

/// Reads lines from the end of a byte source toward its start.
#[derive(Debug)]
pub struct ReverseScanner<S> {
    source: S,
    /// Offset of the first byte in `pending`.
    cursor: u64,
    /// Bytes read but not yet returned as lines.
    pending: Vec<u8>,
    block_size: NonZeroUsize,
    state: ScanState,
    /// Set until the first segment has been split off the end.
    at_tail: bool,
}

impl<S: ByteSource> ReverseScanner<S> {
    /// Creates a scanner positioned at `end`, normally the source's length.
    pub const fn new(source: S, end: u64, block_size: NonZeroUsize) -> Self {
        Self {
            source,
            cursor: end,
            pending: Vec::new(),
            block_size,
            state: ScanState::Active,
            at_tail: true,
        }
    }

    /// Current read position. Everything before it is still unread.
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether the scanner has read back to the start of the source.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.state, ScanState::Exhausted)
    }

    /// Returns the previous line, or `None` once the start of the source has
    /// been reached.
    ///
    /// A read failure is returned from this call and from every call after
    /// it. A source ending in a newline does not yield an empty last line.
    pub fn get_line(&mut self) -> Result<Option<Line>> {
        loop {
            if let ScanState::Failed(err) = &self.state {
                return Err(err.clone());
            }

            if let Some(idx) = memrchr(b'\n', &self.pending) {
                let text = String::from_utf8_lossy(&self.pending[idx + 1..]).into_owned();
                self.pending.truncate(idx);
                let offset = self.cursor + idx as u64 + 1;

                if std::mem::take(&mut self.at_tail) && text.is_empty() {
                    continue;
                }

                return Ok(Some(Line { text, offset }));
            }

            if self.is_exhausted() {
                self.at_tail = false;
                if self.pending.is_empty() {
                    return Ok(None);
                }

                let head = std::mem::take(&mut self.pending);
                return Ok(Some(Line {
                    text: String::from_utf8_lossy(&head).into_owned(),
                    offset: 0,
                }));
            }

            self.read_more();
        }
    }

    /// Pulls the next block preceding the cursor into the pending buffer.
    fn read_more(&mut self) {
        if !matches!(self.state, ScanState::Active) {
            return;
        }

        if self.cursor == 0 {
            self.state = ScanState::Exhausted;
            return;
        }

        #[allow(clippy::cast_possible_truncation)]
        let size = (self.block_size.get() as u64).min(self.cursor) as usize;
        self.cursor -= size as u64;

        let mut block = Vec::with_capacity(size + self.pending.len());
        block.resize(size, 0);

        match self.source.read_exact_at(&mut block, self.cursor) {
            Ok(()) => {
                trace!(offset = self.cursor, size, "read block");
                block.extend_from_slice(&self.pending);
                self.pending = block;
            }
            Err(e) => {
                warn!(offset = self.cursor, size, error = %e, "block read failed");
                self.state = ScanState::Failed(Error::Read {
                    offset: self.cursor,
                    source: Arc::new(e),
                });
            }
        }
    }
}
