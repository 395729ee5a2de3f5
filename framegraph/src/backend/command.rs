//! Recorded GPU commands.
//!
//! Execute callbacks do not talk to a graphics API; they append [`GpuCommand`]s
//! to a [`CommandList`] which the submission context hands to the device.

use super::{GpuBuffer, GpuTexture};
use crate::state::{BarrierBatch, PipelineStage, ResourceState};

/// One contiguous region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// A global memory barrier, not tied to a specific resource.
///
/// Used around staging flushes where many buffers are written at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBarrier {
    pub src_stage: PipelineStage,
    pub src_access: ResourceState,
    pub dst_stage: PipelineStage,
    pub dst_access: ResourceState,
}

impl MemoryBarrier {
    /// Host writes into staging memory, made visible to transfer reads.
    pub const HOST_TO_TRANSFER: Self = Self {
        src_stage: PipelineStage::Host,
        src_access: ResourceState::General,
        dst_stage: PipelineStage::Transfer,
        dst_access: ResourceState::TransferSource,
    };

    /// Everything recorded so far completes before transfer writes begin.
    pub const ALL_TO_TRANSFER: Self = Self {
        src_stage: PipelineStage::BottomOfPipe,
        src_access: ResourceState::General,
        dst_stage: PipelineStage::Transfer,
        dst_access: ResourceState::TransferDestination,
    };

    /// Transfer writes, made visible to every later stage.
    pub const TRANSFER_TO_ALL: Self = Self {
        src_stage: PipelineStage::Transfer,
        src_access: ResourceState::TransferDestination,
        dst_stage: PipelineStage::BottomOfPipe,
        dst_access: ResourceState::General,
    };
}

/// A single recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// Per-resource transitions computed by the state tracker.
    PipelineBarrier(BarrierBatch),
    /// Global memory dependency.
    MemoryBarrier(MemoryBarrier),
    /// Copy between two buffers.
    CopyBuffer {
        src: GpuBuffer,
        dst: GpuBuffer,
        regions: Vec<BufferCopyRegion>,
    },
    /// Copy tightly packed texels from a buffer into a texture.
    CopyBufferToTexture {
        src: GpuBuffer,
        src_offset: u64,
        dst: GpuTexture,
    },
    /// Open a debug label.
    BeginLabel(String),
    /// Close the innermost debug label.
    EndLabel,
    /// Compute dispatch.
    Dispatch { x: u32, y: u32, z: u32 },
    /// Non-indexed draw.
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    /// Indexed indirect draws read from `buffer`.
    DrawIndexedIndirect {
        buffer: GpuBuffer,
        offset: u64,
        draw_count: u32,
    },
}

/// Commands recorded for one submission, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<GpuCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command.
    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    /// Append a barrier batch; empty batches are dropped.
    pub fn pipeline_barrier(&mut self, batch: BarrierBatch) {
        if !batch.is_empty() {
            self.commands.push(GpuCommand::PipelineBarrier(batch));
        }
    }

    pub fn begin_label(&mut self, label: impl Into<String>) {
        self.commands.push(GpuCommand::BeginLabel(label.into()));
    }

    pub fn end_label(&mut self) {
        self.commands.push(GpuCommand::EndLabel);
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate over every per-resource barrier batch.
    pub fn barrier_batches(&self) -> impl Iterator<Item = &BarrierBatch> + '_ {
        self.commands.iter().filter_map(|c| match c {
            GpuCommand::PipelineBarrier(batch) => Some(batch),
            _ => None,
        })
    }

    /// Commands recorded between the `BeginLabel(label)` and its matching `EndLabel`.
    pub fn labelled(&self, label: &str) -> Option<&[GpuCommand]> {
        let start = self
            .commands
            .iter()
            .position(|c| matches!(c, GpuCommand::BeginLabel(l) if l == label))?;

        let mut depth = 0usize;
        for (i, command) in self.commands.iter().enumerate().skip(start + 1) {
            match command {
                GpuCommand::BeginLabel(_) => depth += 1,
                GpuCommand::EndLabel if depth == 0 => return Some(&self.commands[start + 1..i]),
                GpuCommand::EndLabel => depth -= 1,
                _ => {}
            }
        }

        None
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn into_commands(self) -> Vec<GpuCommand> {
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_barrier_batch_is_dropped() {
        let mut list = CommandList::new();
        list.pipeline_barrier(BarrierBatch::new());
        assert!(list.is_empty());
    }

    #[test]
    fn test_labelled_handles_nesting() {
        let mut list = CommandList::new();
        list.begin_label("outer");
        list.push(GpuCommand::Dispatch { x: 1, y: 1, z: 1 });
        list.begin_label("inner");
        list.push(GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        });
        list.end_label();
        list.end_label();

        let outer = list.labelled("outer").map(|c| c.len());
        let inner = list.labelled("inner").map(|c| c.to_vec());

        assert_eq!(outer, Some(4));
        assert_eq!(
            inner,
            Some(vec![GpuCommand::Draw {
                vertex_count: 3,
                instance_count: 1
            }])
        );
        assert!(list.labelled("missing").is_none());
    }
}
