//! Assembles filtered lines from a scanner into bounded batches.

use std::num::NonZeroUsize;

use crate::error::Result;
use crate::filter::LineFilter;
use crate::scanner::ReverseScanner;
use crate::source::ByteSource;

/// Lines gathered by one call to [`retrieve_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Retrieved {
    /// Matching lines, newest first.
    pub lines: Vec<String>,

    /// Whether the scanner reached the start of the file.
    pub end_of_file: bool,
}

/// Scanned lines between two checks of the stop condition in
/// [`retrieve_batch_until`].
pub const STOP_CHECK_INTERVAL: usize = 1024;

/// Pulls lines from `scanner` until `max_lines` of them pass `filter` or the
/// scanner runs out.
///
/// On a scan error the matches gathered so far are dropped and only the error
/// is returned.
pub fn retrieve_batch<S: ByteSource>(
    scanner: &mut ReverseScanner<S>,
    filter: &LineFilter,
    max_lines: NonZeroUsize,
) -> Result<Retrieved> {
    Ok(retrieve_batch_until(scanner, filter, max_lines, || false)?.unwrap_or_default())
}

/// Like [`retrieve_batch`], but gives up once `stop` returns true.
///
/// `stop` is polled every [`STOP_CHECK_INTERVAL`] scanned lines, matching or
/// not, so a filter that rejects everything still notices. Returns `None` when
/// stopped; the lines gathered so far are dropped.
pub fn retrieve_batch_until<S, F>(
    scanner: &mut ReverseScanner<S>,
    filter: &LineFilter,
    max_lines: NonZeroUsize,
    mut stop: F,
) -> Result<Option<Retrieved>>
where
    S: ByteSource,
    F: FnMut() -> bool,
{
    let mut lines = Vec::new();
    let mut scanned = 0usize;

    while let Some(line) = scanner.get_line()? {
        scanned += 1;
        if scanned % STOP_CHECK_INTERVAL == 0 && stop() {
            return Ok(None);
        }

        if filter.matches(&line.text) {
            lines.push(line.text);
            if lines.len() == max_lines.get() {
                return Ok(Some(Retrieved {
                    lines,
                    end_of_file: false,
                }));
            }
        }
    }

    Ok(Some(Retrieved {
        lines,
        end_of_file: true,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;

    use proptest::prelude::*;

    use crate::error::Error;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn scanner(content: &[u8], block_size: usize) -> ReverseScanner<&[u8]> {
        ReverseScanner::new(content, content.len() as u64, nz(block_size))
    }

    fn drain(content: &[u8], filter: &LineFilter, batch: usize) -> Vec<String> {
        let mut scanner = scanner(content, 16);
        let mut all = Vec::new();
        loop {
            let retrieved = retrieve_batch(&mut scanner, filter, nz(batch)).unwrap();
            assert!(retrieved.lines.len() <= batch);
            all.extend(retrieved.lines);
            if retrieved.end_of_file {
                return all;
            }
        }
    }

    #[test]
    fn test_stops_at_max_lines() {
        let mut scanner = scanner(b"1\n2\n3\n4\n5", 3);
        let filter = LineFilter::Passthrough;

        let first = retrieve_batch(&mut scanner, &filter, nz(2)).unwrap();
        assert_eq!(first.lines, vec!["5", "4"]);
        assert!(!first.end_of_file);

        let second = retrieve_batch(&mut scanner, &filter, nz(2)).unwrap();
        assert_eq!(second.lines, vec!["3", "2"]);
        assert!(!second.end_of_file);

        let third = retrieve_batch(&mut scanner, &filter, nz(2)).unwrap();
        assert_eq!(third.lines, vec!["1"]);
        assert!(third.end_of_file);
    }

    #[test]
    fn test_exact_fill_reports_eof_on_next_call() {
        let mut scanner = scanner(b"a\nb", 8);
        let filter = LineFilter::Passthrough;

        let full = retrieve_batch(&mut scanner, &filter, nz(2)).unwrap();
        assert_eq!(full.lines, vec!["b", "a"]);
        assert!(!full.end_of_file);

        let empty = retrieve_batch(&mut scanner, &filter, nz(2)).unwrap();
        assert!(empty.lines.is_empty());
        assert!(empty.end_of_file);
    }

    #[test]
    fn test_filter_applied() {
        let content = b"kernel: one\nuser: two\nkernel: three\nuser: four";
        let lines = drain(content, &LineFilter::include(Some("kernel")), 10);
        assert_eq!(lines, vec!["kernel: three", "kernel: one"]);
    }

    struct BrokenSource;

    impl ByteSource for BrokenSource {
        fn read_exact_at(&self, _buf: &mut [u8], _offset: u64) -> io::Result<()> {
            Err(io::Error::other("device gone"))
        }
    }

    #[test]
    fn test_error_discards_partial_matches() {
        let mut scanner = ReverseScanner::new(BrokenSource, 100, nz(10));
        let err = retrieve_batch(&mut scanner, &LineFilter::Passthrough, nz(5)).unwrap_err();
        assert!(matches!(err, Error::Read { offset: 90, .. }));
    }

    #[test]
    fn test_stop_interrupts_unmatched_scan() {
        let content = "noise\n".repeat(STOP_CHECK_INTERVAL * 4);
        let mut scanner = scanner(content.as_bytes(), 64);
        let filter = LineFilter::include(Some("never present"));

        let mut polls = 0;
        let retrieved = retrieve_batch_until(&mut scanner, &filter, nz(10), || {
            polls += 1;
            polls == 2
        })
        .unwrap();

        assert_eq!(retrieved, None);
        assert_eq!(polls, 2);
        assert!(!scanner.is_exhausted());
        assert!(scanner.cursor() > 0);
    }

    #[test]
    fn test_stop_never_firing_matches_plain_retrieval() {
        let content = "x\n".repeat(STOP_CHECK_INTERVAL * 2 + 3);
        let mut scanner = scanner(content.as_bytes(), 32);

        let retrieved =
            retrieve_batch_until(&mut scanner, &LineFilter::Passthrough, nz(5000), || false)
                .unwrap()
                .unwrap();

        assert_eq!(retrieved.lines.len(), STOP_CHECK_INTERVAL * 2 + 3);
        assert!(retrieved.end_of_file);
    }

    proptest! {
        #[test]
        fn prop_batched_filter_equals_full_filter(
            lines in proptest::collection::vec("[a-c]{0,6}", 0..40),
            batch in 1usize..7,
        ) {
            let content = lines.join("\n");
            let filter = LineFilter::include(Some("ab"));

            let expected: Vec<String> = drain(content.as_bytes(), &LineFilter::Passthrough, 1000)
                .into_iter()
                .filter(|line| filter.matches(line))
                .collect();

            prop_assert_eq!(drain(content.as_bytes(), &filter, batch), expected);
        }
    }
}
