//! Row partitioning across workers

use std::ops::Range;

/// Contiguous block of rows `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub start: usize,
    pub count: usize,
}

impl RowRange {
    pub fn end(&self) -> usize {
        self.start + self.count
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.end()
    }
}

/// Split `n` rows across `parts` consumers
///
/// Each part gets `n / parts` rows and the first `n % parts` parts get one
/// extra. Ranges are returned in row order; when `parts > n` the trailing
/// parts are empty.
pub fn partition_rows(n: usize, parts: usize) -> Vec<RowRange> {
    if parts == 0 {
        return Vec::new();
    }

    let base = n / parts;
    let extra = n % parts;
    let mut start = 0;

    (0..parts)
        .map(|i| {
            let count = base + usize::from(i < extra);
            let range = RowRange { start, count };
            start += count;
            range
        })
        .collect()
}
