//! # RedLilium Frame Graph Demos
//!
//! Headless scenes driving the frame graph on the dummy device.
//!
//! ## Available Demos
//!
//! - `deferred_demo` - G-buffer, compute lighting, tonemap and a luminance
//!   readback over a grid of instanced meshes

pub mod deferred;
pub mod scene;

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
