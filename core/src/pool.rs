//! Allocation-preserving containers for per-frame scratch data.
//!
//! The frame graph rebuilds a handful of lists every frame (sorted node order,
//! pending uploads, per-node usage declarations). [`Pooled<T>`] keeps such a
//! value around between frames: releasing it clears the contents but keeps the
//! capacity, and activating it hands the cleared value back for the next frame.
//!
//! # Example
//!
//! ```
//! use redlilium_core::pool::{Poolable, Pooled};
//!
//! #[derive(Default)]
//! struct Scratch {
//!     order: Vec<u32>,
//! }
//!
//! impl Poolable for Scratch {
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//!     fn reset(&mut self) {
//!         self.order.clear();
//!     }
//! }
//!
//! let mut scratch = Pooled::<Scratch>::default();
//! scratch.activate().order.extend([2, 0, 1]);
//! assert!(scratch.is_active());
//!
//! scratch.release();
//! assert!(scratch.is_pooled());
//! assert!(scratch.inner().order.capacity() >= 3);
//! ```

/// A value that can be cleared in place and reused.
pub trait Poolable {
    /// Create an empty instance.
    fn new_empty() -> Self;

    /// Clear the contents, keeping allocated capacity.
    fn reset(&mut self);
}

/// Either an active value or a cleared one waiting for reuse.
#[derive(Debug)]
pub enum Pooled<T: Poolable> {
    /// Holds data for the current frame.
    Active(T),
    /// Cleared, allocation retained.
    Pooled(T),
}

impl<T: Poolable> Pooled<T> {
    /// Wrap an already filled value.
    pub fn new(value: T) -> Self {
        Self::Active(value)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self, Self::Pooled(_))
    }

    /// The value, if active.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Active(t) => Some(t),
            Self::Pooled(_) => None,
        }
    }

    /// The value mutably, if active.
    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Active(t) => Some(t),
            Self::Pooled(_) => None,
        }
    }

    /// Clear the value and mark it pooled. No-op when already pooled.
    pub fn release(&mut self) {
        if let Self::Active(value) = self {
            value.reset();
            let value = std::mem::replace(value, T::new_empty());
            *self = Self::Pooled(value);
        }
    }

    /// Mark the value active and return it for filling.
    ///
    /// A pooled value comes back cleared; an active one is returned as is.
    pub fn activate(&mut self) -> &mut T {
        if let Self::Pooled(value) = self {
            let value = std::mem::replace(value, T::new_empty());
            *self = Self::Active(value);
        }

        match self {
            Self::Active(t) | Self::Pooled(t) => t,
        }
    }

    /// The value regardless of state.
    pub fn inner(&self) -> &T {
        match self {
            Self::Active(t) | Self::Pooled(t) => t,
        }
    }
}

impl<T: Poolable> Default for Pooled<T> {
    fn default() -> Self {
        Self::Pooled(T::new_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct FrameLists {
        sorted: Vec<u32>,
        uploads: Vec<(u64, u64)>,
    }

    impl Poolable for FrameLists {
        fn new_empty() -> Self {
            Self::default()
        }

        fn reset(&mut self) {
            self.sorted.clear();
            self.uploads.clear();
        }
    }

    #[test]
    fn test_default_is_pooled() {
        let pooled = Pooled::<FrameLists>::default();
        assert!(pooled.is_pooled());
        assert!(pooled.get().is_none());
    }

    #[test]
    fn test_release_keeps_capacity_across_frames() {
        let mut pooled = Pooled::<FrameLists>::default();

        for frame in 0..3u32 {
            let lists = pooled.activate();
            assert!(lists.sorted.is_empty());
            lists.sorted.extend(0..16 + frame);
            lists.uploads.push((frame as u64, 64));

            pooled.release();
            assert!(pooled.is_pooled());
            assert!(pooled.inner().sorted.capacity() >= 16);
            assert!(pooled.inner().uploads.is_empty());
        }
    }

    #[test]
    fn test_activate_on_active_keeps_contents() {
        let mut pooled = Pooled::new(FrameLists {
            sorted: vec![4, 2],
            uploads: Vec::new(),
        });

        assert_eq!(pooled.activate().sorted, vec![4, 2]);
        if let Some(lists) = pooled.get_mut() {
            lists.sorted.push(9);
        }
        assert_eq!(pooled.get().map(|l| l.sorted.len()), Some(3));
    }
}
