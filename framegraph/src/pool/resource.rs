//! What the pool needs to know about textures and buffers.
//!
//! The pool logic is shared between both kinds; [`PoolResource`] supplies the
//! kind-specific rules: which descriptors may share a slot, how a slot's
//! descriptor grows as occupants are added, and whether an idle backing can
//! serve a slot.

use std::fmt;
use std::hash::Hash;
use std::ops::BitOr;

use crate::backend::{GpuBuffer, GpuDevice, GpuResource, GpuTexture};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureUsage};

pub trait PoolResource: 'static {
    type Descriptor: Clone + Eq + Hash + fmt::Debug;
    type Usage: Copy + Eq + Hash + fmt::Debug + Default + BitOr<Output = Self::Usage>;
    type Gpu: Copy + Eq + Hash + fmt::Debug + fmt::Display + Into<GpuResource>;

    /// Name used in log messages.
    const KIND: &'static str;

    fn usage(descriptor: &Self::Descriptor) -> Self::Usage;

    fn set_usage(descriptor: &mut Self::Descriptor, usage: Self::Usage);

    /// Whether two logical resources may ever share backing memory.
    fn can_share_slot(a: &Self::Descriptor, b: &Self::Descriptor) -> bool;

    /// Grow a slot descriptor so it can hold `occupant` too.
    fn merge_into_slot(slot: &mut Self::Descriptor, occupant: &Self::Descriptor);

    /// Whether an existing backing created from `backing` can serve `required`.
    fn backing_fits(backing: &Self::Descriptor, required: &Self::Descriptor) -> bool;

    fn create(
        device: &dyn GpuDevice,
        descriptor: &Self::Descriptor,
    ) -> Result<Self::Gpu, GraphicsError>;
}

/// Marker for pooled textures.
#[derive(Debug)]
pub enum TextureResource {}

/// Marker for pooled buffers.
#[derive(Debug)]
pub enum BufferResource {}

impl PoolResource for TextureResource {
    type Descriptor = TextureDescriptor;
    type Usage = TextureUsage;
    type Gpu = GpuTexture;

    const KIND: &'static str = "texture";

    fn usage(descriptor: &TextureDescriptor) -> TextureUsage {
        descriptor.usage
    }

    fn set_usage(descriptor: &mut TextureDescriptor, usage: TextureUsage) {
        descriptor.usage = usage;
    }

    fn can_share_slot(a: &TextureDescriptor, b: &TextureDescriptor) -> bool {
        a.shape() == b.shape()
    }

    fn merge_into_slot(slot: &mut TextureDescriptor, occupant: &TextureDescriptor) {
        slot.usage |= occupant.usage;
    }

    fn backing_fits(backing: &TextureDescriptor, required: &TextureDescriptor) -> bool {
        backing.shape() == required.shape() && backing.usage == required.usage
    }

    fn create(
        device: &dyn GpuDevice,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuTexture, GraphicsError> {
        device.create_texture(descriptor)
    }
}

impl PoolResource for BufferResource {
    type Descriptor = BufferDescriptor;
    type Usage = BufferUsage;
    type Gpu = GpuBuffer;

    const KIND: &'static str = "buffer";

    fn usage(descriptor: &BufferDescriptor) -> BufferUsage {
        descriptor.usage
    }

    fn set_usage(descriptor: &mut BufferDescriptor, usage: BufferUsage) {
        descriptor.usage = usage;
    }

    fn can_share_slot(_: &BufferDescriptor, _: &BufferDescriptor) -> bool {
        true
    }

    fn merge_into_slot(slot: &mut BufferDescriptor, occupant: &BufferDescriptor) {
        slot.size = slot.size.max(occupant.size);
        slot.usage |= occupant.usage;
    }

    fn backing_fits(backing: &BufferDescriptor, required: &BufferDescriptor) -> bool {
        backing.usage == required.usage && backing.size >= required.size
    }

    fn create(
        device: &dyn GpuDevice,
        descriptor: &BufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        device.create_buffer(descriptor)
    }
}
