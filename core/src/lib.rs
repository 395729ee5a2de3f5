//! # RedLilium Core
//!
//! Small building blocks shared by the RedLilium frame graph crates:
//!
//! - [`handle`]: generation-counted handles and the [`handle::Arena`] that owns the values
//! - [`pool`]: allocation-preserving containers for per-frame scratch data
//! - [`profiling`]: optional Tracy instrumentation macros

pub mod handle;
pub mod pool;
pub mod profiling;

pub use handle::{Arena, Handle};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
