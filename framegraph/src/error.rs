//! Graphics error types.

use std::fmt;

use crate::state::TrackedResource;

/// Errors raised by the resource layers below the frame graph.
///
/// Graph-level failures (cycles, wiring mistakes) live in
/// [`GraphError`](crate::graph::GraphError), which wraps this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// An internal error occurred.
    Internal(String),
    /// The staging ring cannot fit the requested bytes until older
    /// submissions retire.
    StagingExhausted { requested: u64, available: u64 },
    /// The transient pool needs more backing slots than it is allowed to own.
    PoolExhausted { required: usize, capacity: usize },
    /// A transition was requested for a resource the state tracker does not know.
    NotTracked(TrackedResource),
    /// A handle was stale or belongs to another frame.
    InvalidHandle(&'static str),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::StagingExhausted {
                requested,
                available,
            } => write!(
                f,
                "staging ring exhausted: requested {requested} bytes, {available} available"
            ),
            Self::PoolExhausted { required, capacity } => write!(
                f,
                "transient pool exhausted: {required} slots required, capacity is {capacity}"
            ),
            Self::NotTracked(resource) => write!(f, "resource {resource} is not tracked"),
            Self::InvalidHandle(what) => write!(f, "invalid {what} handle"),
        }
    }
}

impl std::error::Error for GraphicsError {}
