//! Draw and instance registry.
//!
//! The registry sits beside the frame graph rather than inside it. It keeps
//! every mesh resident in one shared vertex buffer and one shared index
//! buffer, and once per frame turns the renderable instances handed to it by
//! the entity storage into batches of tightly packed per-instance tables in
//! the staging ring. Nodes pick the registry up as a service and turn those
//! staged tables into ordinary buffer pins with
//! [`BuildContext::create_buffer_from_staged`].
//!
//! ```text
//! get_or_create_mesh ──► staging ──► flush_uploads ──► vertex/index tables
//! generate_draw_calls ─► staging ──► BatchDrawData ──► node buffer pins
//! ```
//!
//! Instances are grouped by index type and by the set of instance data they
//! carry. Each group becomes one batch with its own instance table id, and
//! every instance gets a global id packing both:
//!
//! ```text
//!  23      20 19                   0
//! ┌──────────┬──────────────────────┐
//! │  table   │   index in batch     │
//! └──────────┴──────────────────────┘
//! ```
//!
//! [`BuildContext::create_buffer_from_staged`]: crate::graph::BuildContext::create_buffer_from_staged

mod mesh_table;

pub use mesh_table::{MeshDrawRange, MeshIndexType};

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;
use uuid::Uuid;

use crate::backend::{CommandList, GpuBuffer, GpuCommand, GpuDevice, MemoryBarrier};
use crate::config::DrawRegistryConfig;
use crate::error::GraphicsError;
use crate::staging::{StagingRing, StagingSpan};
use crate::submission::SubmissionContext;
use crate::types::DrawIndexedIndirectArgs;
use mesh_table::MeshTable;

/// Bits of a global instance id holding the index inside the batch.
pub const INSTANCE_INDEX_BITS: u32 = 20;
/// Bits of a global instance id holding the instance table id.
pub const INSTANCE_TABLE_BITS: u32 = 4;

const INSTANCE_INDEX_MASK: u32 = (1 << INSTANCE_INDEX_BITS) - 1;
const MAX_INSTANCE_TABLES: usize = 1 << INSTANCE_TABLE_BITS;

/// Pack an instance table id and an index inside it.
pub fn make_global_instance_id(table: u32, index: u32) -> u32 {
    debug_assert!(index <= INSTANCE_INDEX_MASK);
    debug_assert!((table as usize) < MAX_INSTANCE_TABLES);
    (index & INSTANCE_INDEX_MASK) | (table << INSTANCE_INDEX_BITS)
}

/// Split a global instance id into `(table, index)`.
pub fn split_global_instance_id(id: u32) -> (u32, u32) {
    (id >> INSTANCE_INDEX_BITS, id & INSTANCE_INDEX_MASK)
}

/// A mesh resident in the registry's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawMeshId(u32);

impl DrawMeshId {
    /// Position of the mesh in [`DrawRegistry::mesh_database_data`].
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A registered kind of per-instance data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceBufferId(u32);

impl InstanceBufferId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// CPU-side mesh handed over by a [`MeshProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MeshData {
    /// Packed vertices.
    pub vertices: Vec<u8>,
    /// Size of one vertex in bytes.
    pub vertex_stride: u32,
    /// Packed indices, empty for [`MeshIndexType::None`].
    pub indices: Vec<u8>,
    pub index_type: MeshIndexType,
}

impl MeshData {
    pub fn with_u32_indices<V: Pod>(vertices: &[V], indices: &[u32]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: std::mem::size_of::<V>() as u32,
            indices: bytemuck::cast_slice(indices).to_vec(),
            index_type: MeshIndexType::U32,
        }
    }

    pub fn with_u16_indices<V: Pod>(vertices: &[V], indices: &[u16]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: std::mem::size_of::<V>() as u32,
            indices: bytemuck::cast_slice(indices).to_vec(),
            index_type: MeshIndexType::U16,
        }
    }

    pub fn non_indexed<V: Pod>(vertices: &[V]) -> Self {
        Self {
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: std::mem::size_of::<V>() as u32,
            indices: Vec::new(),
            index_type: MeshIndexType::None,
        }
    }

    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            return 0;
        }
        (self.vertices.len() / self.vertex_stride as usize) as u32
    }

    pub fn index_count(&self) -> u32 {
        match self.index_type.size() {
            0 => 0,
            size => (self.indices.len() as u64 / size) as u32,
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.vertex_stride == 0 || self.vertices.is_empty() {
            return Err("mesh has no vertices".into());
        }
        if self.vertices.len() % self.vertex_stride as usize != 0 {
            return Err(format!(
                "{} vertex bytes are not a multiple of the stride {}",
                self.vertices.len(),
                self.vertex_stride
            ));
        }
        match self.index_type {
            MeshIndexType::None if !self.indices.is_empty() => {
                Err("non-indexed mesh carries index data".into())
            }
            MeshIndexType::None => Ok(()),
            index_type if self.indices.is_empty() => {
                Err(format!("{index_type:?} mesh has no indices"))
            }
            index_type if self.indices.len() as u64 % index_type.size() != 0 => Err(format!(
                "{} index bytes are not a multiple of {:?}",
                self.indices.len(),
                index_type
            )),
            _ => Ok(()),
        }
    }
}

/// Source of mesh data, keyed by asset UUID.
pub trait MeshProvider {
    /// Load the mesh, or `None` if the asset is unknown.
    fn load_mesh(&self, uuid: Uuid) -> Option<MeshData>;
}

/// One renderable instance, as iterated from the entity storage.
#[derive(Debug, Clone, Copy)]
pub struct InstanceRecord<'a> {
    /// Entity id in the external storage.
    pub entity: u64,
    pub mesh: DrawMeshId,
    /// Raw bytes of each instance data kind the entity carries.
    pub data: &'a [(InstanceBufferId, &'a [u8])],
}

/// A staged per-instance table of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawInstanceBuffer {
    pub id: InstanceBufferId,
    /// `element_size * instance_count` bytes in the staging ring.
    pub span: StagingSpan,
}

/// Everything a node needs to draw one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDrawData {
    pub instance_table_id: u32,
    pub index_type: MeshIndexType,
    pub num_instances: u32,
    /// One staged table per instance data kind, ordered by id.
    pub instance_buffers: Vec<DrawInstanceBuffer>,
    /// Mesh of each instance, in instance order.
    pub meshes: Vec<DrawMeshId>,
}

struct InstanceDataType {
    name: String,
    element_size: u64,
}

struct PendingMeshUpload {
    span: StagingSpan,
    buffer: GpuBuffer,
    offset: u64,
}

type BatchKey = (MeshIndexType, Vec<InstanceBufferId>);

/// Mesh and instance tables shared by every node that draws.
pub struct DrawRegistry {
    meshes: MeshTable,
    ranges: Vec<MeshDrawRange>,
    index_types: Vec<MeshIndexType>,
    mesh_lookup: HashMap<Uuid, DrawMeshId>,
    instance_types: Vec<InstanceDataType>,
    pending_uploads: Vec<PendingMeshUpload>,
    draw_calls: Vec<BatchDrawData>,
    instance_ids: HashMap<u64, u32>,
}

impl DrawRegistry {
    pub fn new(device: Arc<dyn GpuDevice>, config: DrawRegistryConfig) -> Result<Self, GraphicsError> {
        log::info!(
            "DrawRegistry: creating mesh tables ({} vertex bytes, {} index bytes)",
            config.vertex_table_size,
            config.index_table_size
        );

        Ok(Self {
            meshes: MeshTable::new(&device, config)?,
            ranges: Vec::new(),
            index_types: Vec::new(),
            mesh_lookup: HashMap::new(),
            instance_types: Vec::new(),
            pending_uploads: Vec::new(),
            draw_calls: Vec::new(),
            instance_ids: HashMap::new(),
        })
    }

    /// Register a kind of per-instance data. Registering the same name twice
    /// returns the first id.
    pub fn register_instance_data(&mut self, name: &str, element_size: u64) -> InstanceBufferId {
        debug_assert!(element_size > 0, "instance data '{name}' has no size");

        if let Some(index) = self.instance_types.iter().position(|t| t.name == name) {
            let existing = &self.instance_types[index];
            if existing.element_size != element_size {
                log::warn!(
                    "DrawRegistry: '{name}' already registered with {} bytes, ignoring {element_size}",
                    existing.element_size
                );
            }
            return InstanceBufferId(index as u32);
        }

        log::debug!("DrawRegistry: registered instance data '{name}' ({element_size} bytes)");
        self.instance_types.push(InstanceDataType {
            name: name.to_owned(),
            element_size,
        });
        InstanceBufferId(self.instance_types.len() as u32 - 1)
    }

    pub fn instance_data_name(&self, id: InstanceBufferId) -> Option<&str> {
        self.instance_types.get(id.0 as usize).map(|t| t.name.as_str())
    }

    pub fn instance_data_size(&self, id: InstanceBufferId) -> Option<u64> {
        self.instance_types.get(id.0 as usize).map(|t| t.element_size)
    }

    /// Return the resident mesh for `uuid`, loading and staging it first if
    /// needed. The copy into the tables is recorded by the next
    /// [`flush_uploads`](Self::flush_uploads).
    pub fn get_or_create_mesh(
        &mut self,
        uuid: Uuid,
        provider: &dyn MeshProvider,
        staging: &mut StagingRing,
    ) -> Option<DrawMeshId> {
        if let Some(&id) = self.mesh_lookup.get(&uuid) {
            return Some(id);
        }

        let Some(mesh) = provider.load_mesh(uuid) else {
            log::warn!("DrawRegistry: no mesh data for {uuid}");
            return None;
        };

        if let Err(reason) = mesh.validate() {
            log::warn!("DrawRegistry: rejecting mesh {uuid}: {reason}");
            return None;
        }

        match self.create_mesh(&mesh, staging) {
            Ok(id) => {
                log::trace!(
                    "DrawRegistry: mesh {uuid} resident as #{} ({} vertices, {} indices)",
                    id.0,
                    mesh.vertex_count(),
                    mesh.index_count()
                );
                self.mesh_lookup.insert(uuid, id);
                Some(id)
            }
            Err(err) => {
                log::warn!("DrawRegistry: failed to create mesh {uuid}: {err}");
                None
            }
        }
    }

    fn create_mesh(&mut self, mesh: &MeshData, staging: &mut StagingRing) -> Result<DrawMeshId, GraphicsError> {
        let vertex_stride = u64::from(mesh.vertex_stride);
        let index_size = mesh.index_type.size();

        // Stage before allocating so a full ring does not waste table space.
        let vertex_span = staging.stage(&mesh.vertices)?;
        let index_span = if mesh.indices.is_empty() {
            None
        } else {
            Some(staging.stage(&mesh.indices)?)
        };

        let allocation = self
            .meshes
            .allocate(
                mesh.vertices.len() as u64,
                vertex_stride,
                mesh.indices.len() as u64,
                mesh.index_type,
            )
            .ok_or(GraphicsError::OutOfMemory)?;

        self.pending_uploads.push(PendingMeshUpload {
            span: vertex_span,
            buffer: self.meshes.vertex_buffer(),
            offset: allocation.vertex_offset,
        });
        if let Some(span) = index_span {
            self.pending_uploads.push(PendingMeshUpload {
                span,
                buffer: self.meshes.index_buffer(),
                offset: allocation.index_offset,
            });
        }

        let id = DrawMeshId(self.ranges.len() as u32);
        self.ranges.push(MeshDrawRange {
            vertex_offset: (allocation.vertex_offset / vertex_stride) as u32,
            vertex_count: mesh.vertex_count(),
            index_offset: allocation.index_offset.checked_div(index_size).unwrap_or(0) as u32,
            index_count: mesh.index_count(),
        });
        self.index_types.push(mesh.index_type);
        Ok(id)
    }

    /// The resident mesh for `uuid`, without loading it.
    pub fn try_get_mesh(&self, uuid: Uuid) -> Option<DrawMeshId> {
        self.mesh_lookup.get(&uuid).copied()
    }

    pub fn mesh_range(&self, mesh: DrawMeshId) -> Option<&MeshDrawRange> {
        self.ranges.get(mesh.0 as usize)
    }

    pub fn mesh_index_type(&self, mesh: DrawMeshId) -> Option<MeshIndexType> {
        self.index_types.get(mesh.0 as usize).copied()
    }

    pub fn mesh_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn vertex_buffer(&self) -> GpuBuffer {
        self.meshes.vertex_buffer()
    }

    pub fn index_buffer(&self) -> GpuBuffer {
        self.meshes.index_buffer()
    }

    pub fn has_pending_uploads(&self) -> bool {
        !self.pending_uploads.is_empty()
    }

    /// Record the staged mesh copies, fenced by global barriers so earlier
    /// reads of the tables finish first and later stages see the new data.
    pub fn flush_uploads(&mut self, commands: &mut CommandList, staging: &StagingRing) {
        if self.pending_uploads.is_empty() {
            return;
        }

        redlilium_core::profile_scope!("draw_registry::flush_uploads");
        log::trace!("DrawRegistry: flushing {} mesh uploads", self.pending_uploads.len());

        commands.begin_label("draw_registry::flush_uploads");
        commands.push(GpuCommand::MemoryBarrier(MemoryBarrier::HOST_TO_TRANSFER));
        commands.push(GpuCommand::MemoryBarrier(MemoryBarrier::ALL_TO_TRANSFER));

        for upload in self.pending_uploads.drain(..) {
            staging.upload(commands, upload.span, upload.buffer, upload.offset);
        }

        commands.push(GpuCommand::MemoryBarrier(MemoryBarrier::TRANSFER_TO_ALL));
        commands.end_label();
    }

    /// Rebuild the frame's batches from `instances`.
    ///
    /// Batches appear in the order their first instance does, and instances
    /// keep their relative order inside a batch. On error the previous draw
    /// calls are gone and nothing is returned half-built.
    pub fn generate_draw_calls(
        &mut self,
        instances: &[InstanceRecord<'_>],
        staging: &mut StagingRing,
    ) -> Result<(), GraphicsError> {
        redlilium_core::profile_scope!("draw_registry::generate_draw_calls");

        self.draw_calls.clear();
        self.instance_ids.clear();

        let mut batch_lookup: HashMap<BatchKey, usize> = HashMap::new();
        let mut batches: Vec<(BatchKey, Vec<&InstanceRecord<'_>>)> = Vec::new();

        for record in instances {
            let key = self.batch_key(record)?;
            let slot = match batch_lookup.get(&key) {
                Some(&slot) => slot,
                None => {
                    if batches.len() == MAX_INSTANCE_TABLES {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "more than {MAX_INSTANCE_TABLES} instance tables in one frame"
                        )));
                    }
                    batch_lookup.insert(key.clone(), batches.len());
                    batches.push((key, Vec::new()));
                    batches.len() - 1
                }
            };
            batches[slot].1.push(record);
        }

        let mut draw_calls = Vec::with_capacity(batches.len());
        let mut instance_ids = HashMap::with_capacity(instances.len());

        for (table, ((index_type, data_ids), records)) in batches.into_iter().enumerate() {
            let table = table as u32;
            let count = records.len() as u64;
            if count > u64::from(INSTANCE_INDEX_MASK) + 1 {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{count} instances in table {table} exceed the instance id range"
                )));
            }

            let mut instance_buffers = Vec::with_capacity(data_ids.len());
            for &id in &data_ids {
                let element_size = self.instance_types[id.0 as usize].element_size;
                let span = staging.stage_allocate(element_size * count)?;
                for (index, record) in records.iter().enumerate() {
                    let bytes = record
                        .data
                        .iter()
                        .find_map(|&(data_id, bytes)| (data_id == id).then_some(bytes))
                        .unwrap_or_default();
                    staging.copy_to(span, index as u64 * element_size, bytes)?;
                }
                instance_buffers.push(DrawInstanceBuffer { id, span });
            }

            for (index, record) in records.iter().enumerate() {
                let global = make_global_instance_id(table, index as u32);
                if instance_ids.insert(record.entity, global).is_some() {
                    log::warn!("DrawRegistry: entity {} submitted twice", record.entity);
                }
            }

            draw_calls.push(BatchDrawData {
                instance_table_id: table,
                index_type,
                num_instances: count as u32,
                instance_buffers,
                meshes: records.iter().map(|r| r.mesh).collect(),
            });
        }

        log::debug!(
            "DrawRegistry: {} instances in {} batches",
            instances.len(),
            draw_calls.len()
        );

        self.draw_calls = draw_calls;
        self.instance_ids = instance_ids;
        Ok(())
    }

    fn batch_key(&self, record: &InstanceRecord<'_>) -> Result<BatchKey, GraphicsError> {
        let index_type = self
            .mesh_index_type(record.mesh)
            .ok_or(GraphicsError::InvalidHandle("draw mesh"))?;

        let mut ids = Vec::with_capacity(record.data.len());
        for &(id, bytes) in record.data {
            let Some(data_type) = self.instance_types.get(id.0 as usize) else {
                return Err(GraphicsError::InvalidHandle("instance data"));
            };
            if bytes.len() as u64 != data_type.element_size {
                return Err(GraphicsError::InvalidParameter(format!(
                    "entity {}: '{}' expects {} bytes, got {}",
                    record.entity,
                    data_type.name,
                    data_type.element_size,
                    bytes.len()
                )));
            }
            ids.push(id);
        }

        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(GraphicsError::InvalidParameter(format!(
                "entity {} carries the same instance data twice",
                record.entity
            )));
        }

        Ok((index_type, ids))
    }

    /// Batches of the last [`generate_draw_calls`](Self::generate_draw_calls).
    pub fn draw_calls(&self) -> &[BatchDrawData] {
        &self.draw_calls
    }

    /// Global instance id assigned to `entity` this frame.
    pub fn instance_id(&self, entity: u64) -> Option<u32> {
        self.instance_ids.get(&entity).copied()
    }

    /// One indexed indirect draw per instance of `batch`, instance `i`
    /// drawn with `first_instance = i`.
    pub fn indirect_draw_args(&self, batch: &BatchDrawData) -> Vec<DrawIndexedIndirectArgs> {
        batch
            .meshes
            .iter()
            .enumerate()
            .filter_map(|(i, mesh)| Some(self.mesh_range(*mesh)?.indirect_args(1, i as u32)))
            .collect()
    }

    /// The packed [`MeshDrawRange`] table, indexed by [`DrawMeshId::index`].
    pub fn mesh_database_data(&self) -> &[u8] {
        bytemuck::cast_slice(&self.ranges)
    }

    /// Queue the mesh tables for destruction after the current submission.
    pub fn shutdown(self, submission: &mut SubmissionContext) {
        log::info!("DrawRegistry: shutting down ({} meshes)", self.ranges.len());
        self.meshes.shutdown(submission);
    }
}

impl std::fmt::Debug for DrawRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawRegistry")
            .field("meshes", &self.meshes)
            .field("mesh_count", &self.ranges.len())
            .field("instance_types", &self.instance_types.len())
            .field("draw_calls", &self.draw_calls.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(DrawRegistry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;
    use crate::config::StagingConfig;
    use rstest::rstest;

    const TRIANGLE: Uuid = Uuid::from_u128(0x1);
    const QUAD: Uuid = Uuid::from_u128(0x2);
    const POINTS: Uuid = Uuid::from_u128(0x3);

    struct TestMeshes;

    impl MeshProvider for TestMeshes {
        fn load_mesh(&self, uuid: Uuid) -> Option<MeshData> {
            let positions = [[0.0f32; 3]; 4];
            match uuid {
                TRIANGLE => Some(MeshData::with_u16_indices(&positions[..3], &[0, 1, 2])),
                QUAD => Some(MeshData::with_u32_indices(&positions, &[0, 1, 2, 2, 3, 0])),
                POINTS => Some(MeshData::non_indexed(&positions)),
                _ => None,
            }
        }
    }

    fn setup() -> (Arc<DummyDevice>, DrawRegistry, StagingRing) {
        let device = Arc::new(DummyDevice::new());
        let registry = DrawRegistry::new(device.clone(), DrawRegistryConfig::default()).unwrap();
        let mut staging = StagingRing::new(device.clone(), StagingConfig::default()).unwrap();
        staging.begin_frame(1);
        (device, registry, staging)
    }

    #[rstest]
    #[case(0, 0, 0)]
    #[case(3, 17, (3 << 20) | 17)]
    #[case(15, INSTANCE_INDEX_MASK, 0xFF_FFFF)]
    fn test_global_instance_id(#[case] table: u32, #[case] index: u32, #[case] expected: u32) {
        let id = make_global_instance_id(table, index);
        assert_eq!(id, expected);
        assert_eq!(split_global_instance_id(id), (table, index));
    }

    #[test]
    fn test_meshes_are_cached_by_uuid() {
        let (_device, mut registry, mut staging) = setup();

        let first = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();
        let used = staging.used_bytes();
        let again = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();

        assert_eq!(first, again);
        assert_eq!(staging.used_bytes(), used);
        assert_eq!(registry.try_get_mesh(QUAD), Some(first));
        assert_eq!(registry.try_get_mesh(TRIANGLE), None);
        assert_eq!(registry.mesh_count(), 1);
    }

    #[test]
    fn test_unknown_mesh_is_none() {
        let (_device, mut registry, mut staging) = setup();
        assert!(registry
            .get_or_create_mesh(Uuid::from_u128(99), &TestMeshes, &mut staging)
            .is_none());
        assert!(!registry.has_pending_uploads());
    }

    #[test]
    fn test_mesh_database_ranges() {
        let (_device, mut registry, mut staging) = setup();
        let triangle = registry.get_or_create_mesh(TRIANGLE, &TestMeshes, &mut staging).unwrap();
        let quad = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();

        let ranges: &[MeshDrawRange] = bytemuck::cast_slice(registry.mesh_database_data());
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[triangle.index() as usize].vertex_count, 3);
        assert_eq!(ranges[triangle.index() as usize].index_count, 3);

        // 3 vertices of 12 bytes, then 6 u16 bytes rounded up to a u32 boundary.
        assert_eq!(ranges[quad.index() as usize].vertex_offset, 3);
        assert_eq!(ranges[quad.index() as usize].index_offset, 2);
        assert_eq!(ranges[quad.index() as usize].index_count, 6);
    }

    #[test]
    fn test_flush_uploads_fences_copies() {
        let (_device, mut registry, mut staging) = setup();
        registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();
        registry.get_or_create_mesh(POINTS, &TestMeshes, &mut staging).unwrap();

        let mut commands = CommandList::new();
        registry.flush_uploads(&mut commands, &staging);
        assert!(!registry.has_pending_uploads());

        let flushed = commands.labelled("draw_registry::flush_uploads").unwrap();
        let copies = flushed
            .iter()
            .filter(|c| matches!(c, GpuCommand::CopyBuffer { .. }))
            .count();
        // Quad vertices and indices, point vertices.
        assert_eq!(copies, 3);
        assert_eq!(
            flushed.last(),
            Some(&GpuCommand::MemoryBarrier(MemoryBarrier::TRANSFER_TO_ALL))
        );

        let mut empty = CommandList::new();
        registry.flush_uploads(&mut empty, &staging);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_draw_calls_grouped_by_index_type_and_data() {
        let (_device, mut registry, mut staging) = setup();
        let transform = registry.register_instance_data("transform", 64);
        let color = registry.register_instance_data("color", 16);
        assert_eq!(registry.register_instance_data("transform", 64), transform);

        let triangle = registry.get_or_create_mesh(TRIANGLE, &TestMeshes, &mut staging).unwrap();
        let quad = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();

        let t = [1u8; 64];
        let c = [2u8; 16];
        let full = [(color, &c[..]), (transform, &t[..])];
        let only_transform = [(transform, &t[..])];

        let instances = [
            InstanceRecord { entity: 10, mesh: quad, data: &full },
            InstanceRecord { entity: 11, mesh: quad, data: &only_transform },
            InstanceRecord { entity: 12, mesh: quad, data: &full },
            InstanceRecord { entity: 13, mesh: triangle, data: &full },
        ];
        registry.generate_draw_calls(&instances, &mut staging).unwrap();

        let calls = registry.draw_calls();
        assert_eq!(calls.len(), 3);

        assert_eq!(calls[0].instance_table_id, 0);
        assert_eq!(calls[0].index_type, MeshIndexType::U32);
        assert_eq!(calls[0].num_instances, 2);
        assert_eq!(calls[0].instance_buffers.len(), 2);
        assert_eq!(calls[0].instance_buffers[0].id, transform);
        assert_eq!(calls[0].instance_buffers[0].span.size(), 128);
        assert_eq!(calls[0].instance_buffers[1].span.size(), 32);

        assert_eq!(calls[1].num_instances, 1);
        assert_eq!(calls[2].index_type, MeshIndexType::U16);

        assert_eq!(registry.instance_id(10), Some(0));
        assert_eq!(registry.instance_id(12), Some(1));
        assert_eq!(registry.instance_id(11), Some(1 << 20));
        assert_eq!(registry.instance_id(13), Some(2 << 20));
        assert_eq!(registry.instance_id(99), None);
    }

    #[test]
    fn test_instance_data_is_packed_in_instance_order() {
        let (_device, mut registry, mut staging) = setup();
        let id = registry.register_instance_data("id", 4);
        let quad = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();

        let values: Vec<[u8; 4]> = (0u32..3).map(|i| (i * 7).to_le_bytes()).collect();
        let data: Vec<[(InstanceBufferId, &[u8]); 1]> =
            values.iter().map(|v| [(id, &v[..])]).collect();
        let instances: Vec<InstanceRecord<'_>> = data
            .iter()
            .enumerate()
            .map(|(i, d)| InstanceRecord { entity: i as u64, mesh: quad, data: d })
            .collect();

        registry.generate_draw_calls(&instances, &mut staging).unwrap();

        let span = registry.draw_calls()[0].instance_buffers[0].span;
        let mut out = [0u32; 3];
        staging
            .copy_from(bytemuck::cast_slice_mut(&mut out), span, 0)
            .unwrap();
        assert_eq!(out, [0, 7, 14]);

        let args = registry.indirect_draw_args(&registry.draw_calls()[0]);
        assert_eq!(args.len(), 3);
        assert_eq!(args[2].first_instance, 2);
        assert_eq!(args[2].index_count, 6);
    }

    #[test]
    fn test_wrong_instance_data_size_is_rejected() {
        let (_device, mut registry, mut staging) = setup();
        let transform = registry.register_instance_data("transform", 64);
        let quad = registry.get_or_create_mesh(QUAD, &TestMeshes, &mut staging).unwrap();

        let short = [0u8; 12];
        let data = [(transform, &short[..])];
        let instances = [InstanceRecord { entity: 1, mesh: quad, data: &data }];

        let result = registry.generate_draw_calls(&instances, &mut staging);
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
        assert!(registry.draw_calls().is_empty());
    }

    #[test]
    fn test_shutdown_defers_table_destruction() {
        let (device, registry, staging) = setup();
        let mut submission = SubmissionContext::new(device.clone(), Default::default());
        registry.shutdown(&mut submission);
        staging.shutdown(&mut submission);
        submission.shutdown().unwrap();
        assert_eq!(device.stats().live_buffers, 0);
    }
}
