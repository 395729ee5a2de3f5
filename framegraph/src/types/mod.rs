//! Descriptors and usage flags for GPU resources.

mod buffer;
mod common;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, DrawIndexedIndirectArgs};
pub use common::{Extent3d, align_up};
pub use texture::{TextureDescriptor, TextureFormat, TextureShape, TextureUsage};
