//! Record boundary detection for sharded processing.
//!
//! ISO 2709 records end with 0x1D, a byte that cannot occur inside a
//! well-formed record. The scanner finds those terminators with the
//! SIMD-accelerated `memchr` crate, either listing every record span or
//! cutting a buffer into a few contiguous shards that each end on a record
//! boundary.
//!
//! # Example
//!
//! ```
//! use marcsift::boundary_scanner::RecordBoundaryScanner;
//!
//! let data = [1, 2, 3, 0x1D, 4, 5, 0x1D];
//! let mut scanner = RecordBoundaryScanner::new();
//! assert_eq!(scanner.scan(&data), &[(0, 4), (4, 3)]);
//!
//! let shards = RecordBoundaryScanner::shard_ranges(&data, 2);
//! assert_eq!(shards, vec![0..4, 4..7]);
//! ```

use crate::reader::RECORD_TERMINATOR;
use std::ops::Range;

/// Record boundary scanner using SIMD-accelerated delimiter detection.
#[derive(Debug, Default)]
pub struct RecordBoundaryScanner {
    /// Reused across scans
    boundaries: Vec<(usize, usize)>,
}

impl RecordBoundaryScanner {
    /// Create a new boundary scanner.
    #[must_use]
    pub fn new() -> Self {
        Self {
            boundaries: Vec::with_capacity(100),
        }
    }

    /// Scan a buffer for complete records.
    ///
    /// Returns `(offset, length)` pairs; each length includes the 0x1D
    /// terminator. Bytes after the last terminator are not a complete record
    /// and are not listed (see [`trailing_len`](Self::trailing_len)).
    pub fn scan(&mut self, buffer: &[u8]) -> &[(usize, usize)] {
        self.boundaries.clear();
        let mut offset = 0;
        for terminator_pos in memchr::memchr_iter(RECORD_TERMINATOR, buffer) {
            self.boundaries.push((offset, terminator_pos - offset + 1));
            offset = terminator_pos + 1;
        }
        &self.boundaries
    }

    /// Number of bytes after the last record terminator.
    #[must_use]
    pub fn trailing_len(buffer: &[u8]) -> usize {
        memchr::memrchr(RECORD_TERMINATOR, buffer).map_or(buffer.len(), |pos| buffer.len() - pos - 1)
    }

    /// Number of record terminators in `buffer`.
    #[must_use]
    pub fn count_records(buffer: &[u8]) -> usize {
        memchr::memchr_iter(RECORD_TERMINATOR, buffer).count()
    }

    /// Cut `buffer` into at most `shards` contiguous, non-empty ranges of
    /// roughly equal size.
    ///
    /// Every range except the last ends just after a record terminator; the
    /// last range runs to the end of the buffer, so trailing bytes without a
    /// terminator stay attached to it. The ranges cover the buffer exactly.
    #[must_use]
    pub fn shard_ranges(buffer: &[u8], shards: usize) -> Vec<Range<usize>> {
        let shards = shards.max(1);
        let target = ((buffer.len() + shards - 1) / shards).max(1);
        let mut ranges = Vec::with_capacity(shards);
        let mut start = 0;

        while start < buffer.len() {
            if ranges.len() + 1 == shards {
                break;
            }
            let cut = (start + target - 1).min(buffer.len() - 1);
            match memchr::memchr(RECORD_TERMINATOR, &buffer[cut..]) {
                Some(pos) if cut + pos + 1 < buffer.len() => {
                    let end = cut + pos + 1;
                    ranges.push(start..end);
                    start = end;
                },
                _ => break,
            }
        }
        if start < buffer.len() {
            ranges.push(start..buffer.len());
        }
        ranges
    }

    /// Clear internal state.
    pub fn clear(&mut self) {
        self.boundaries.clear();
    }

    /// Get the current capacity of the scanner.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.boundaries.capacity()
    }
}
