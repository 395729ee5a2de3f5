//! Optional Tracy instrumentation.
//!
//! With the `profiling` feature enabled the macros below forward to
//! [`tracy_client`]; without it they expand to nothing, so instrumented code
//! pays no runtime cost in normal builds.
//!
//! ```ignore
//! use redlilium_core::{frame_mark, profile_scope};
//!
//! fn render_frame() {
//!     {
//!         profile_scope!("frame_graph::build");
//!         // ...
//!     }
//!     frame_mark!();
//! }
//! ```
//!
//! Enable it with `cargo run --features profiling` and connect Tracy to the
//! running process.

#[cfg(feature = "profiling")]
pub use tracy_client::{
    self, Client, Span, frame_mark as tracy_frame_mark, plot as tracy_plot, span,
};

/// Mark the end of a frame.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! frame_mark {
    () => {
        $crate::profiling::tracy_frame_mark()
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! frame_mark {
    () => {};
}

/// Open a named span that closes at the end of the enclosing scope.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_span = $crate::profiling::span!($name);
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_scope {
    ($name:expr) => {};
}

/// Open a span named after the enclosing function.
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_function {
    () => {
        let _profile_span = $crate::profiling::span!();
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_function {
    () => {};
}

/// Plot a numeric value over time (slot counts, staged bytes, ...).
#[macro_export]
#[cfg(feature = "profiling")]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        $crate::profiling::tracy_plot!($name, $value as f64)
    };
}

#[macro_export]
#[cfg(not(feature = "profiling"))]
macro_rules! profile_plot {
    ($name:expr, $value:expr) => {
        let _ = $value;
    };
}

pub use crate::{frame_mark, profile_function, profile_plot, profile_scope};
