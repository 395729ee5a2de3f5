//! Generation-counted handles and the arena that hands them out.
//!
//! Frame graph objects (nodes, pins, transient resources, subgraphs) are never
//! referenced by pointer. Instead they live in an [`Arena<T>`] and are addressed
//! by a [`Handle<T>`]: a slot index paired with the generation of the slot at
//! the time the value was inserted.
//!
//! When a value is removed, its slot generation is bumped. Any handle created
//! before the removal then fails to resolve, even after the slot is reused by a
//! newer value, so stale handles from a previous frame are detected instead of
//! silently aliasing unrelated data.
//!
//! # Example
//!
//! ```
//! use redlilium_core::handle::Arena;
//!
//! let mut arena = Arena::new();
//! let a = arena.insert("albedo");
//! assert_eq!(arena.get(a), Some(&"albedo"));
//!
//! arena.remove(a);
//! let b = arena.insert("normals");
//!
//! // `b` reuses the slot, but `a` is stale.
//! assert_eq!(a.index(), b.index());
//! assert_eq!(arena.get(a), None);
//! assert_eq!(arena.get(b), Some(&"normals"));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Typed index + generation reference into an [`Arena<T>`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Build a handle from its raw parts.
    ///
    /// Mostly useful for serialization and tests; the arena validates the
    /// generation on every lookup.
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index of this handle.
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was created.
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Reinterpret the handle as pointing into an arena of another type.
    pub const fn cast<U>(self) -> Handle<U> {
        Handle::from_raw_parts(self.index, self.generation)
    }
}

// Manual impls: derives would require `T: Clone`/`T: PartialEq`/...

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

impl<T> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

impl<T> Slot<T> {
    fn generation(&self) -> u32 {
        match self {
            Self::Occupied { generation, .. } | Self::Vacant { generation } => *generation,
        }
    }
}

/// Slot storage with generation-validated handles.
///
/// Insertion reuses vacant slots first (most recently freed first), so indices
/// stay dense for long-lived arenas that churn every frame.
///
/// Slot indices are `u32`, so an arena holds at most [`Arena::MAX_SLOTS`]
/// slots. Inserting past that panics, as does indexing with a stale handle;
/// [`Arena::get`] is the checked lookup.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Largest number of slots an arena can address.
    pub const MAX_SLOTS: usize = u32::MAX as usize;

    /// Create an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Create an empty arena with room for `capacity` values.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena has no live values.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value and return its handle.
    ///
    /// # Panics
    ///
    /// When every vacant slot is taken and the arena already has
    /// [`Arena::MAX_SLOTS`] slots.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        if let Some(index) = self.free.pop() {
            self.len += 1;
            let slot = &mut self.slots[index as usize];
            let generation = slot.generation();
            *slot = Slot::Occupied { generation, value };
            return Handle::from_raw_parts(index, generation);
        }

        let Some(index) = u32::try_from(self.slots.len())
            .ok()
            .filter(|&index| (index as usize) < Self::MAX_SLOTS)
        else {
            log::error!("Arena<{}>: all {} slots in use", std::any::type_name::<T>(), Self::MAX_SLOTS);
            panic!("arena capacity of {} slots exceeded", Self::MAX_SLOTS);
        };

        self.len += 1;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });

        Handle::from_raw_parts(index, 0)
    }

    /// Remove the value behind `handle`, returning it if the handle was live.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;

        if !matches!(slot, Slot::Occupied { generation, .. } if *generation == handle.generation)
        {
            return None;
        }

        let next = Slot::Vacant {
            generation: handle.generation.wrapping_add(1),
        };

        match std::mem::replace(slot, next) {
            Slot::Occupied { value, .. } => {
                self.free.push(handle.index);
                self.len -= 1;
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }

    /// Check whether `handle` still refers to a live value.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Resolve a handle.
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Iterate over live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::from_raw_parts(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Iterate mutably over live values with their handles, in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::from_raw_parts(index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Iterate over live values.
    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, value)| value)
    }

    /// Iterate mutably over live values.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.iter_mut().map(|(_, value)| value)
    }

    /// Collect the handles of all live values.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Remove every value. Outstanding handles become stale.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Occupied { generation, .. } = slot {
                *slot = Slot::Vacant {
                    generation: generation.wrapping_add(1),
                };
                self.free.push(index as u32);
            }
        }

        if self.len > 0 {
            log::trace!("Arena<{}>: cleared {} values", std::any::type_name::<T>(), self.len);
        }
        self.len = 0;
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::ops::Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

impl<T> std::ops::IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert(1u32);
        let b = arena.insert(2u32);

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.get(b), Some(&2));
        assert_ne!(a, b);
    }

    #[test]
    fn test_remove_invalidates_handle() {
        let mut arena = Arena::new();
        let a = arena.insert("a");

        assert_eq!(arena.remove(a), Some("a"));
        assert!(arena.is_empty());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        arena.remove(a);

        let b = arena.insert(20);
        assert_eq!(a.index(), b.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena[b], 20);
    }

    #[test]
    fn test_clear_makes_all_handles_stale() {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();

        arena.clear();

        assert!(arena.is_empty());
        for h in handles {
            assert!(!arena.contains(h));
        }

        let fresh = arena.insert(7);
        assert_eq!(arena.get(fresh), Some(&7));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        let c = arena.insert('c');
        arena.remove(b);

        let live: Vec<_> = arena.iter().collect();
        assert_eq!(live, vec![(a, &'a'), (c, &'c')]);

        for value in arena.values_mut() {
            *value = value.to_ascii_uppercase();
        }
        assert_eq!(arena[a], 'A');
        assert_eq!(arena[c], 'C');
    }

    #[rstest]
    #[case(1, 0, 4)]
    #[case(4, 2, 5)]
    #[case(8, 8, 8)]
    #[case(16, 5, 16)]
    fn test_freed_slots_are_reused_before_growing(
        #[case] inserted: usize,
        #[case] removed: usize,
        #[case] expected_slots: usize,
    ) {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..inserted).map(|i| arena.insert(i)).collect();
        for &handle in handles.iter().take(removed) {
            arena.remove(handle);
        }
        for i in 0..3 {
            arena.insert(100 + i);
        }

        assert_eq!(arena.slots.len(), expected_slots);
        assert_eq!(arena.len(), inserted - removed + 3);
        assert!(arena.slots.len() <= Arena::<usize>::MAX_SLOTS);
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(7)]
    fn test_generation_counts_removals(#[case] removals: u32) {
        let mut arena = Arena::new();
        let mut handle = arena.insert(0u8);
        for _ in 0..removals {
            arena.remove(handle);
            handle = arena.insert(0u8);
        }
        assert_eq!(handle.index(), 0);
        assert_eq!(handle.generation(), removals);
    }

    #[test]
    fn test_cast_preserves_raw_parts() {
        let h: Handle<u8> = Handle::from_raw_parts(3, 9);
        let c: Handle<u16> = h.cast();
        assert_eq!(c.index(), 3);
        assert_eq!(c.generation(), 9);
    }

    #[test]
    #[should_panic(expected = "stale or invalid handle")]
    fn test_index_with_stale_handle_panics() {
        let mut arena = Arena::new();
        let a = arena.insert(0);
        arena.remove(a);
        let _ = arena[a];
    }
}
