//! GPU device abstraction.
//!
//! The frame graph never talks to a graphics API directly. Everything it needs
//! from the device goes through the [`GpuDevice`] trait: creating and
//! destroying resources, writing/reading host-visible memory, submitting a
//! recorded [`CommandList`], and reporting which submissions have completed.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`GpuBuffer`], [`GpuTexture`], [`GpuSemaphore`] | Opaque device handles |
//! | [`GpuResource`] | Any destroyable device object (deferred destruction) |
//! | [`CommandList`] / [`GpuCommand`] | Commands recorded during execute |
//! | [`DummyDevice`] | In-memory device used by tests and headless runs |

mod command;
mod dummy;

pub use command::{BufferCopyRegion, CommandList, GpuCommand, MemoryBarrier};
pub use dummy::{DeviceStats, DummyDevice};

use std::fmt;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, TextureDescriptor};

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw device id.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw device id.
            pub const fn raw(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

device_handle!(
    /// Device buffer handle.
    GpuBuffer,
    "buffer"
);
device_handle!(
    /// Device texture (image) handle.
    GpuTexture,
    "texture"
);
device_handle!(
    /// Device semaphore handle, used to order submissions across queues.
    GpuSemaphore,
    "semaphore"
);

/// A device object that can be queued for deferred destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
    Semaphore(GpuSemaphore),
}

impl From<GpuBuffer> for GpuResource {
    fn from(buffer: GpuBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<GpuTexture> for GpuResource {
    fn from(texture: GpuTexture) -> Self {
        Self::Texture(texture)
    }
}

impl From<GpuSemaphore> for GpuResource {
    fn from(semaphore: GpuSemaphore) -> Self {
        Self::Semaphore(semaphore)
    }
}

impl fmt::Display for GpuResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(b) => b.fmt(f),
            Self::Texture(t) => t.fmt(f),
            Self::Semaphore(s) => s.fmt(f),
        }
    }
}

/// One unit of GPU work handed to [`GpuDevice::submit`].
#[derive(Debug)]
pub struct Submission<'a> {
    /// Submission index; the device reports it as completed once the GPU is done.
    pub index: u64,
    /// Recorded commands.
    pub commands: CommandList,
    /// Semaphores to wait on before executing.
    pub wait_semaphores: &'a [GpuSemaphore],
    /// Semaphores to signal after executing.
    pub signal_semaphores: &'a [GpuSemaphore],
}

/// Operations the frame graph needs from a GPU device.
///
/// Completion is polled, never pushed: [`completed_submit_index`] returns the
/// highest submission index the device has finished, and is monotonic.
///
/// [`completed_submit_index`]: GpuDevice::completed_submit_index
pub trait GpuDevice: Send + Sync + 'static {
    /// Human readable backend name.
    fn name(&self) -> &'static str;

    /// Create a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError>;

    /// Create a texture.
    fn create_texture(&self, descriptor: &TextureDescriptor)
    -> Result<GpuTexture, GraphicsError>;

    /// Create a semaphore.
    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError>;

    /// Destroy a resource immediately. The caller guarantees the GPU is done with it.
    fn destroy(&self, resource: GpuResource);

    /// Write into host-visible buffer memory.
    fn write_buffer(&self, buffer: GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Read from host-visible buffer memory.
    fn read_buffer(
        &self,
        buffer: GpuBuffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), GraphicsError>;

    /// Submit recorded commands.
    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError>;

    /// Highest submission index known to be complete (0 if none).
    fn completed_submit_index(&self) -> u64;

    /// Block until the submission with `index` completes.
    fn wait_for_submit(&self, index: u64) -> Result<(), GraphicsError>;

    /// Block until every submission completes.
    fn wait_idle(&self) -> Result<(), GraphicsError>;
}
