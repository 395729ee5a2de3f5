//! Segmented ring bookkeeping.
//!
//! [`RingTracker`] only does arithmetic over `[0, capacity)`; it never touches
//! memory. An allocation that does not fit before the end of the ring wraps
//! around and is returned as two segments.

/// Half-open byte range `[begin, end)` inside the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Segment {
    pub begin: u64,
    pub end: u64,
}

impl Segment {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

/// Up to two segments; the second one is only non-empty when the allocation wrapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SegmentedSpan {
    pub segments: [Segment; 2],
}

impl SegmentedSpan {
    /// Total bytes covered by both segments.
    pub fn size(&self) -> u64 {
        self.segments[0].len() + self.segments[1].len()
    }

    /// Whether the span is a single contiguous range.
    pub fn is_contiguous(&self) -> bool {
        self.segments[1].is_empty()
    }

    /// The span with its first `offset` bytes skipped.
    pub fn subspan(&self, offset: u64) -> Self {
        let mut result = *self;
        let mut remaining = offset;

        for segment in &mut result.segments {
            let skip = remaining.min(segment.len());
            segment.begin += skip;
            remaining -= skip;
        }

        result
    }

    /// The span limited to its first `size` bytes.
    pub fn truncate(&self, size: u64) -> Self {
        let mut result = *self;
        let mut remaining = size;

        for segment in &mut result.segments {
            let keep = remaining.min(segment.len());
            segment.end = segment.begin + keep;
            remaining -= keep;
        }

        result
    }

    /// Non-empty segments in order.
    pub fn iter(&self) -> impl Iterator<Item = Segment> + '_ {
        self.segments.iter().copied().filter(|s| !s.is_empty())
    }
}

/// Tracks used bytes of a ring of fixed capacity.
///
/// Allocations are released in the order they were fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingTracker {
    capacity: u64,
    /// Offset of the oldest used byte.
    first_used: u64,
    used: u64,
}

impl RingTracker {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            first_used: 0,
            used: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available_count(&self) -> u64 {
        self.capacity - self.used
    }

    pub fn used_count(&self) -> u64 {
        self.used
    }

    pub fn has_available(&self, count: u64) -> bool {
        count <= self.available_count()
    }

    /// Offset the next allocation starts at.
    pub fn first_unused(&self) -> u64 {
        if self.capacity == 0 {
            return 0;
        }
        (self.first_used + self.used) % self.capacity
    }

    /// Bytes available contiguously from [`first_unused`](Self::first_unused).
    pub fn first_segment_available_count(&self) -> u64 {
        if self.first_used + self.used >= self.capacity {
            // Already wrapped: free space runs up to the oldest used byte.
            self.available_count()
        } else {
            self.capacity - self.first_unused()
        }
    }

    /// Take `count` bytes, or `None` if they are not available.
    pub fn fetch(&mut self, count: u64) -> Option<SegmentedSpan> {
        if !self.has_available(count) {
            return None;
        }

        let begin = self.first_unused();
        let first_len = count.min(self.first_segment_available_count());
        let second_len = count - first_len;

        self.used += count;

        Some(SegmentedSpan {
            segments: [
                Segment::new(begin, begin + first_len),
                Segment::new(0, second_len),
            ],
        })
    }

    /// Give back the `count` oldest bytes.
    pub fn release(&mut self, count: u64) {
        debug_assert!(count <= self.used, "releasing more than was fetched");
        let count = count.min(self.used);

        self.used -= count;
        self.first_used = (self.first_used + count) % self.capacity;
    }
}
