//! Declared resource usages.
//!
//! Nodes never name GPU states directly. During build they declare how they
//! use a resource with a [`ResourceUsage`] inside a pass of some [`PassKind`];
//! the pair decides the state and pipeline stage the tracker transitions to.

use super::{PipelineStage, ResourceState};
use crate::types::{BufferUsage, TextureUsage};

/// Kind of work a node records, used to pick the pipeline stage of shader
/// accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PassKind {
    /// No pass has begun; only usages with a fixed stage are meaningful.
    #[default]
    None,
    Graphics,
    Compute,
    RayTracing,
    Transfer,
}

/// How a node uses a texture or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    /// Written as a color attachment.
    RenderTarget,
    /// Depth test without writes.
    DepthStencilRead,
    /// Depth test with writes.
    DepthStencilWrite,
    /// Sampled or read through a read-only binding.
    ShaderRead,
    /// Read as a storage image/buffer.
    StorageRead,
    /// Written as a storage image/buffer.
    StorageWrite,
    /// Bound as uniform data.
    Uniform,
    /// Read as vertex attributes.
    VertexRead,
    /// Read as indices.
    IndexRead,
    /// Read as indirect draw/dispatch arguments.
    IndirectRead,
    /// Source of a copy.
    TransferSource,
    /// Destination of a copy.
    TransferDestination,
    /// Copied back to host memory after the node executes.
    Download,
    /// Handed to the presentation engine.
    Present,
}

impl ResourceUsage {
    /// State the resource must be in for this usage.
    pub fn state(self) -> ResourceState {
        match self {
            Self::RenderTarget => ResourceState::RenderTarget,
            Self::DepthStencilRead => ResourceState::DepthStencilRead,
            Self::DepthStencilWrite => ResourceState::DepthStencilWrite,
            Self::ShaderRead => ResourceState::ShaderRead,
            Self::StorageRead => ResourceState::StorageRead,
            Self::StorageWrite => ResourceState::StorageWrite,
            Self::Uniform => ResourceState::Uniform,
            Self::VertexRead => ResourceState::VertexRead,
            Self::IndexRead => ResourceState::IndexRead,
            Self::IndirectRead => ResourceState::IndirectRead,
            Self::TransferSource | Self::Download => ResourceState::TransferSource,
            Self::TransferDestination => ResourceState::TransferDestination,
            Self::Present => ResourceState::Present,
        }
    }

    /// Pipeline stage the usage happens in, given the pass it is declared in.
    ///
    /// Shader accesses follow the pass kind; attachment, vertex input and
    /// copy usages have a fixed stage.
    pub fn stage(self, pass: PassKind) -> PipelineStage {
        match self {
            Self::RenderTarget
            | Self::DepthStencilRead
            | Self::DepthStencilWrite
            | Self::VertexRead
            | Self::IndexRead
            | Self::IndirectRead => PipelineStage::Graphics,
            Self::ShaderRead | Self::StorageRead | Self::StorageWrite | Self::Uniform => {
                match pass {
                    PassKind::Compute => PipelineStage::Compute,
                    PassKind::RayTracing => PipelineStage::RayTracing,
                    PassKind::Transfer => PipelineStage::Transfer,
                    PassKind::Graphics | PassKind::None => PipelineStage::Graphics,
                }
            }
            Self::TransferSource | Self::TransferDestination | Self::Download => {
                PipelineStage::Transfer
            }
            Self::Present => PipelineStage::BottomOfPipe,
        }
    }

    /// Check if this usage writes the resource.
    pub fn is_write(self) -> bool {
        self.state().is_write()
    }

    /// Texture usage flags the backing texture must be created with.
    pub fn texture_usage(self) -> TextureUsage {
        match self {
            Self::RenderTarget => TextureUsage::RENDER_ATTACHMENT,
            Self::DepthStencilRead | Self::DepthStencilWrite => TextureUsage::DEPTH_STENCIL,
            Self::ShaderRead => TextureUsage::SAMPLED,
            Self::StorageRead | Self::StorageWrite => TextureUsage::STORAGE,
            Self::TransferSource | Self::Download => TextureUsage::COPY_SRC,
            Self::TransferDestination => TextureUsage::COPY_DST,
            Self::Uniform
            | Self::VertexRead
            | Self::IndexRead
            | Self::IndirectRead
            | Self::Present => TextureUsage::empty(),
        }
    }

    /// Buffer usage flags the backing buffer must be created with.
    pub fn buffer_usage(self) -> BufferUsage {
        match self {
            Self::ShaderRead | Self::StorageRead | Self::StorageWrite => BufferUsage::STORAGE,
            Self::Uniform => BufferUsage::UNIFORM,
            Self::VertexRead => BufferUsage::VERTEX,
            Self::IndexRead => BufferUsage::INDEX,
            Self::IndirectRead => BufferUsage::INDIRECT,
            Self::TransferSource | Self::Download => BufferUsage::COPY_SRC,
            Self::TransferDestination => BufferUsage::COPY_DST,
            Self::RenderTarget
            | Self::DepthStencilRead
            | Self::DepthStencilWrite
            | Self::Present => BufferUsage::empty(),
        }
    }

    /// Whether the usage makes sense on a buffer at all.
    pub fn applies_to_buffers(self) -> bool {
        !self.buffer_usage().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ResourceUsage::RenderTarget, true)]
    #[case(ResourceUsage::DepthStencilWrite, true)]
    #[case(ResourceUsage::StorageWrite, true)]
    #[case(ResourceUsage::TransferDestination, true)]
    #[case(ResourceUsage::DepthStencilRead, false)]
    #[case(ResourceUsage::ShaderRead, false)]
    #[case(ResourceUsage::IndirectRead, false)]
    #[case(ResourceUsage::Download, false)]
    fn test_write_classification(#[case] usage: ResourceUsage, #[case] write: bool) {
        assert_eq!(usage.is_write(), write);
    }

    #[rstest]
    #[case(PassKind::Graphics, PipelineStage::Graphics)]
    #[case(PassKind::Compute, PipelineStage::Compute)]
    #[case(PassKind::RayTracing, PipelineStage::RayTracing)]
    fn test_shader_read_stage_follows_pass(#[case] pass: PassKind, #[case] stage: PipelineStage) {
        assert_eq!(ResourceUsage::ShaderRead.stage(pass), stage);
    }

    #[test]
    fn test_fixed_stages() {
        assert_eq!(
            ResourceUsage::RenderTarget.stage(PassKind::Compute),
            PipelineStage::Graphics
        );
        assert_eq!(
            ResourceUsage::Download.stage(PassKind::Graphics),
            PipelineStage::Transfer
        );
        assert_eq!(
            ResourceUsage::Present.stage(PassKind::None),
            PipelineStage::BottomOfPipe
        );
    }

    #[test]
    fn test_usage_flags() {
        assert_eq!(
            ResourceUsage::StorageWrite.texture_usage(),
            TextureUsage::STORAGE
        );
        assert_eq!(
            ResourceUsage::Download.buffer_usage(),
            BufferUsage::COPY_SRC
        );
        assert!(!ResourceUsage::RenderTarget.applies_to_buffers());
        assert!(ResourceUsage::IndirectRead.applies_to_buffers());
    }
}
