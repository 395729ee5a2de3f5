//! Shared vertex and index buffers with linear sub-allocation.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::backend::{GpuBuffer, GpuDevice};
use crate::config::DrawRegistryConfig;
use crate::error::GraphicsError;
use crate::submission::SubmissionContext;
use crate::types::{BufferDescriptor, BufferUsage, DrawIndexedIndirectArgs, align_up};

/// Width of the indices of a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum MeshIndexType {
    /// Non-indexed geometry.
    #[default]
    None,
    U16,
    U32,
}

impl MeshIndexType {
    /// Size of one index in bytes (0 for non-indexed meshes).
    pub fn size(self) -> u64 {
        match self {
            Self::None => 0,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Where a mesh lives inside the shared tables.
///
/// Written to the GPU as-is by [`DrawRegistry::mesh_database_data`], so the
/// layout is fixed at four `u32`s.
///
/// [`DrawRegistry::mesh_database_data`]: super::DrawRegistry::mesh_database_data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct MeshDrawRange {
    /// First vertex, in vertices of the mesh's stride.
    pub vertex_offset: u32,
    pub vertex_count: u32,
    /// First index, in indices of the mesh's index type.
    pub index_offset: u32,
    pub index_count: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<MeshDrawRange>(), 16);

impl MeshDrawRange {
    /// Indirect arguments drawing `instance_count` copies of the mesh.
    pub fn indirect_args(&self, instance_count: u32, first_instance: u32) -> DrawIndexedIndirectArgs {
        DrawIndexedIndirectArgs {
            index_count: self.index_count,
            instance_count,
            first_index: self.index_offset,
            base_vertex: self.vertex_offset as i32,
            first_instance,
        }
    }
}

/// Byte offsets of one allocation in the vertex and index buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MeshAllocation {
    pub vertex_offset: u64,
    pub index_offset: u64,
}

/// Linear allocator over the shared vertex and index buffers.
///
/// Nothing is ever freed: meshes stay resident until the table is destroyed.
pub(crate) struct MeshTable {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_capacity: u64,
    index_capacity: u64,
    vertex_cursor: u64,
    index_cursor: u64,
}

impl MeshTable {
    pub fn new(device: &Arc<dyn GpuDevice>, config: DrawRegistryConfig) -> Result<Self, GraphicsError> {
        let vertex_buffer = device.create_buffer(
            &BufferDescriptor::new(
                config.vertex_table_size,
                BufferUsage::VERTEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label("mesh_table::vertices"),
        )?;

        let index_buffer = match device.create_buffer(
            &BufferDescriptor::new(
                config.index_table_size,
                BufferUsage::INDEX | BufferUsage::STORAGE | BufferUsage::COPY_DST,
            )
            .with_label("mesh_table::indices"),
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy(vertex_buffer.into());
                return Err(err);
            }
        };

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_capacity: config.vertex_table_size,
            index_capacity: config.index_table_size,
            vertex_cursor: 0,
            index_cursor: 0,
        })
    }

    pub fn vertex_buffer(&self) -> GpuBuffer {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> GpuBuffer {
        self.index_buffer
    }

    pub fn vertex_bytes_used(&self) -> u64 {
        self.vertex_cursor
    }

    pub fn index_bytes_used(&self) -> u64 {
        self.index_cursor
    }

    /// Reserve room for one mesh. Vertices start on a multiple of
    /// `vertex_stride` so the offset can be expressed as a base vertex; indices
    /// start on a multiple of their own size.
    pub fn allocate(
        &mut self,
        vertex_bytes: u64,
        vertex_stride: u64,
        index_bytes: u64,
        index_type: MeshIndexType,
    ) -> Option<MeshAllocation> {
        let vertex_offset = self.vertex_cursor.div_ceil(vertex_stride) * vertex_stride;
        let index_offset = align_up(self.index_cursor, index_type.size().max(1));

        let vertex_end = vertex_offset.checked_add(vertex_bytes)?;
        let index_end = index_offset.checked_add(index_bytes)?;
        if vertex_end > self.vertex_capacity || index_end > self.index_capacity {
            return None;
        }

        self.vertex_cursor = vertex_end;
        self.index_cursor = index_end;
        Some(MeshAllocation {
            vertex_offset,
            index_offset,
        })
    }

    pub fn shutdown(self, submission: &mut SubmissionContext) {
        let index = submission.get_submit_index();
        submission.destroy_deferred(self.vertex_buffer, index);
        submission.destroy_deferred(self.index_buffer, index);
    }
}

impl std::fmt::Debug for MeshTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshTable")
            .field("vertices", &format_args!("{}/{}", self.vertex_cursor, self.vertex_capacity))
            .field("indices", &format_args!("{}/{}", self.index_cursor, self.index_capacity))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn table(vertices: u64, indices: u64) -> MeshTable {
        let device: Arc<dyn GpuDevice> = Arc::new(DummyDevice::new());
        MeshTable::new(
            &device,
            DrawRegistryConfig::default()
                .with_vertex_table_size(vertices)
                .with_index_table_size(indices),
        )
        .unwrap()
    }

    #[test]
    fn test_allocations_respect_stride_and_index_size() {
        let mut table = table(1024, 1024);

        let first = table.allocate(36, 12, 6, MeshIndexType::U16).unwrap();
        assert_eq!(first.vertex_offset, 0);
        assert_eq!(first.index_offset, 0);

        let second = table.allocate(64, 32, 12, MeshIndexType::U32).unwrap();
        assert_eq!(second.vertex_offset, 64);
        assert_eq!(second.index_offset, 8);

        assert_eq!(table.vertex_bytes_used(), 128);
        assert_eq!(table.index_bytes_used(), 20);
    }

    #[test]
    fn test_full_table_rejects_allocation() {
        let mut table = table(64, 16);
        assert!(table.allocate(48, 16, 8, MeshIndexType::U32).is_some());
        assert!(table.allocate(32, 16, 0, MeshIndexType::None).is_none());
        assert!(table.allocate(16, 16, 12, MeshIndexType::U32).is_none());
        // Failed attempts leave the cursors alone.
        assert_eq!(table.vertex_bytes_used(), 48);
        assert_eq!(table.index_bytes_used(), 8);
    }

    #[test]
    fn test_indirect_args_from_range() {
        let range = MeshDrawRange {
            vertex_offset: 10,
            vertex_count: 4,
            index_offset: 30,
            index_count: 6,
        };
        let args = range.indirect_args(3, 7);
        assert_eq!(args.index_count, 6);
        assert_eq!(args.first_index, 30);
        assert_eq!(args.base_vertex, 10);
        assert_eq!(args.instance_count, 3);
        assert_eq!(args.first_instance, 7);
    }
}
