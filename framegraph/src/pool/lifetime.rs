//! Lifetime ranges and slot assignment.

use std::fmt;

/// Half-open range `[begin, end)` of node order indices during which a
/// resource is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LifetimeRange {
    pub begin: u32,
    pub end: u32,
}

impl LifetimeRange {
    pub fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin < end, "empty lifetime range [{begin}, {end})");
        Self { begin, end }
    }

    /// Range covering only the node at `index`.
    pub fn single(index: u32) -> Self {
        Self::new(index, index + 1)
    }

    /// Range covering every node of a frame with `node_count` nodes.
    pub fn full_frame(node_count: u32) -> Self {
        Self::new(0, node_count.max(1))
    }

    /// Grow the range so the node at `index` is inside it.
    pub fn extend(&mut self, index: u32) {
        self.begin = self.begin.min(index);
        self.end = self.end.max(index + 1);
    }

    pub fn overlaps(&self, other: &LifetimeRange) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
}

impl fmt::Display for LifetimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Greedy interval coloring.
///
/// Items are visited by range start (ties keep input order) and placed in the
/// first slot whose last occupant has ended and whose key accepts the item.
/// Returns the slot of every item, in input order, and the slot count.
pub fn assign_slots<K>(
    items: &[(LifetimeRange, K)],
    compatible: impl Fn(&K, &K) -> bool,
) -> (Vec<usize>, usize) {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|&i| (items[i].0.begin, i));

    // (end of last occupant, key of first occupant)
    let mut slots: Vec<(u32, usize)> = Vec::new();
    let mut assignment = vec![0usize; items.len()];

    for i in order {
        let (range, key) = &items[i];
        let free = slots
            .iter()
            .position(|&(end, owner)| end <= range.begin && compatible(&items[owner].1, key));

        let slot = match free {
            Some(slot) => {
                slots[slot].0 = range.end;
                slot
            }
            None => {
                slots.push((range.end, i));
                slots.len() - 1
            }
        };
        assignment[i] = slot;
    }

    let count = slots.len();
    (assignment, count)
}
