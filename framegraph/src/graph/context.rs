//! Contexts handed to node callbacks.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use redlilium_core::handle::Arena;
use redlilium_core::pool::Poolable;

use super::GraphError;
use super::SubgraphId;
use super::pin::{BufferPin, DataPin, DataSinkPin, PinField, PinStorage, StorageKey, TexturePin};
use crate::backend::{CommandList, GpuBuffer, GpuCommand, GpuDevice, GpuTexture, MemoryBarrier};
use crate::error::GraphicsError;
use crate::pool::{LifetimeRange, StableId, TransientBufferId, TransientId, TransientPool, TransientTextureId};
use crate::services::ServiceRegistry;
use crate::staging::{StagingRing, StagingSpan};
use crate::state::{PassKind, PipelineStage, ResourceState, ResourceUsage, TrackedState};
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor};

/// Outcome of [`FrameGraph::execute`](super::FrameGraph::execute).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Every active node recorded its commands.
    Executed,
    /// The last build failed; no node ran.
    Skipped,
}

/// Buffer contents copied back to the host.
///
/// Returned by [`BuildContext::download`]. The bytes arrive once the
/// submission that recorded the copy has completed and the graph has noticed
/// it at the start of a later build.
#[derive(Debug, Clone, Default)]
pub struct BufferDownload {
    data: Arc<Mutex<Option<Vec<u8>>>>,
}

impl BufferDownload {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fulfill(&self, bytes: Vec<u8>) {
        *self.data.lock() = Some(bytes);
    }

    pub fn is_ready(&self) -> bool {
        self.data.lock().is_some()
    }

    /// Take the bytes, leaving the download empty.
    pub fn try_take(&self) -> Option<Vec<u8>> {
        self.data.lock().take()
    }

    /// Copy of the bytes.
    pub fn get(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }
}

/// Usage declared by a node during build, applied as a barrier before it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeclaredUsage {
    pub resource: TransientId,
    pub stage: PipelineStage,
    pub state: ResourceState,
}

#[derive(Debug, Clone)]
pub(crate) struct DownloadRequest {
    pub buffer: TransientBufferId,
    pub target: BufferDownload,
}

/// Staged bytes copied into a buffer before the first node executes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingUpload {
    pub span: StagingSpan,
    pub buffer: TransientBufferId,
}

/// What one node declared during build.
#[derive(Debug)]
pub(crate) struct NodeRecord {
    pub node: super::NodeId,
    /// Storage owned by the node's own pins.
    pub owned: Vec<StorageKey>,
    pub usages: Vec<DeclaredUsage>,
    pub downloads: Vec<DownloadRequest>,
}

impl NodeRecord {
    pub fn new(node: super::NodeId, owned: Vec<StorageKey>) -> Self {
        Self {
            node,
            owned,
            usages: Vec::new(),
            downloads: Vec::new(),
        }
    }
}

/// Whether `key` belongs to another node, i.e. the pin is fed through an edge.
fn is_sourced(owned: &[StorageKey], key: Option<StorageKey>) -> bool {
    key.is_some_and(|key| !owned.contains(&key))
}

/// Frame-wide declarations.
#[derive(Debug, Default)]
pub(crate) struct FrameRecord {
    pub uploads: Vec<PendingUpload>,
    /// Every resource created or imported this frame.
    pub resources: Vec<TransientId>,
    pub imports: HashMap<TransientId, TrackedState>,
    /// Subgraph that created each resource.
    pub owners: HashMap<TransientId, SubgraphId>,
    /// Resources touched outside the subgraph that created them.
    pub cross_subgraph: HashSet<TransientId>,
}

/// Result of a successful build.
#[derive(Debug, Default)]
pub(crate) struct CompiledFrame {
    pub nodes: Vec<NodeRecord>,
    pub record: FrameRecord,
    /// Storage read by an active consumer or an enabled output.
    pub active_outputs: HashSet<StorageKey>,
}

impl Poolable for CompiledFrame {
    fn new_empty() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.nodes.clear();
        self.record.uploads.clear();
        self.record.resources.clear();
        self.record.imports.clear();
        self.record.owners.clear();
        self.record.cross_subgraph.clear();
        self.active_outputs.clear();
    }
}

fn storage_ref<'s, T: 'static>(
    storage: &'s Arena<PinStorage>,
    key: Option<StorageKey>,
) -> Result<&'s T, GraphError> {
    let key = key.ok_or_else(|| GraphError::InvalidPin("pin is not bound to a graph".into()))?;
    let entry = storage
        .get(key)
        .ok_or_else(|| GraphError::InvalidPin(format!("pin storage {key} no longer exists")))?;
    entry.downcast_ref::<T>().ok_or_else(|| GraphError::TypeMismatch {
        pin: key.to_string(),
        expected: entry.kind.to_string(),
        found: std::any::type_name::<T>().to_owned(),
    })
}

fn storage_mut<'s, T: 'static>(
    storage: &'s mut Arena<PinStorage>,
    key: Option<StorageKey>,
) -> Result<&'s mut T, GraphError> {
    let key = key.ok_or_else(|| GraphError::InvalidPin("pin is not bound to a graph".into()))?;
    let entry = storage
        .get_mut(key)
        .ok_or_else(|| GraphError::InvalidPin(format!("pin storage {key} no longer exists")))?;
    let kind = entry.kind;
    entry.downcast_mut::<T>().ok_or_else(|| GraphError::TypeMismatch {
        pin: key.to_string(),
        expected: kind.to_string(),
        found: std::any::type_name::<T>().to_owned(),
    })
}

fn texture_id(storage: &Arena<PinStorage>, pin: TexturePin) -> Result<TransientTextureId, GraphError> {
    storage_ref::<Option<TransientTextureId>>(storage, pin.storage_key())?
        .ok_or_else(|| GraphError::InvalidPin("no texture was created for this pin".into()))
}

fn buffer_id(storage: &Arena<PinStorage>, pin: BufferPin) -> Result<TransientBufferId, GraphError> {
    storage_ref::<Option<TransientBufferId>>(storage, pin.storage_key())?
        .ok_or_else(|| GraphError::InvalidPin("no buffer was created for this pin".into()))
}

/// Context for [`FrameGraphNode::init`](super::FrameGraphNode::init).
pub struct InitContext<'a> {
    pub(crate) device: &'a Arc<dyn GpuDevice>,
    pub(crate) services: &'a ServiceRegistry,
    pub(crate) frame_index: u64,
}

impl InitContext<'_> {
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        self.device
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.get()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

/// Context for [`FrameGraphNode::build`](super::FrameGraphNode::build).
///
/// Every resource call records the node's order index so the pool can derive
/// lifetimes, and every usage becomes part of the barrier batch issued before
/// the node executes.
pub struct BuildContext<'a> {
    pub(crate) pool: &'a mut TransientPool,
    pub(crate) storage: &'a mut Arena<PinStorage>,
    pub(crate) staging: &'a mut StagingRing,
    pub(crate) services: &'a ServiceRegistry,
    pub(crate) events: &'a HashSet<TypeId>,
    pub(crate) record: &'a mut FrameRecord,
    pub(crate) node: &'a mut NodeRecord,
    pub(crate) active_outputs: &'a HashSet<StorageKey>,
    pub(crate) subgraph: SubgraphId,
    pub(crate) node_index: u32,
    pub(crate) frame_index: u64,
    pub(crate) pass: PassKind,
}

impl BuildContext<'_> {
    /// Set the kind of work the node records. Shader usages declared after
    /// this take the pass's pipeline stage.
    pub fn begin_pass(&mut self, kind: PassKind) {
        self.pass = kind;
    }

    /// Position of the node in this frame's execution order.
    pub fn node_index(&self) -> u32 {
        self.node_index
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.get()
    }

    /// Whether `E` was pushed with [`FrameGraph::push_event`](super::FrameGraph::push_event) this frame.
    pub fn has_event<E: 'static>(&self) -> bool {
        self.events.contains(&TypeId::of::<E>())
    }

    /// Whether anything active reads what this pin produces.
    pub fn is_active_output<P: PinField>(&self, pin: P) -> bool {
        pin.storage_key()
            .is_some_and(|key| self.active_outputs.contains(&key))
    }

    /// Whether the pin is connected to another node's output.
    ///
    /// Optional inputs use this to tell a connected producer from their own
    /// empty storage.
    pub fn has_source<P: PinField>(&self, pin: P) -> bool {
        is_sourced(&self.node.owned, pin.storage_key())
    }

    /// Create a transient texture on `pin`, used by this node as `usage`.
    pub fn create_texture(
        &mut self,
        pin: TexturePin,
        mut descriptor: TextureDescriptor,
        usage: ResourceUsage,
    ) -> Result<TransientTextureId, GraphError> {
        self.ensure_empty_texture(pin)?;
        descriptor.usage |= usage.texture_usage();

        let id = self
            .pool
            .add_transient_texture(descriptor, LifetimeRange::single(self.node_index));
        *storage_mut::<Option<TransientTextureId>>(self.storage, pin.storage_key())? = Some(id);

        self.register(id.into());
        self.declare(id.into(), usage);
        log::trace!("Build: node {} created texture {id}", self.node_index);
        Ok(id)
    }

    /// Create a transient buffer on `pin`, optionally filled with `data`
    /// before the first node executes.
    pub fn create_buffer(
        &mut self,
        pin: BufferPin,
        descriptor: BufferDescriptor,
        usage: ResourceUsage,
        data: Option<&[u8]>,
    ) -> Result<TransientBufferId, GraphError> {
        let upload = match data {
            Some(bytes) => {
                if bytes.len() as u64 > descriptor.size {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "{} bytes of initial data for a {} byte buffer",
                        bytes.len(),
                        descriptor.size
                    ))
                    .into());
                }
                (!bytes.is_empty()).then(|| self.staging.stage(bytes)).transpose()?
            }
            None => None,
        };
        self.create_buffer_with_upload(pin, descriptor, usage, upload)
    }

    /// Create a buffer holding bytes already staged in the upload ring.
    pub fn create_buffer_from_staged(
        &mut self,
        pin: BufferPin,
        span: StagingSpan,
        usage: ResourceUsage,
    ) -> Result<TransientBufferId, GraphError> {
        let descriptor = BufferDescriptor::new(span.size(), BufferUsage::empty());
        self.create_buffer_with_upload(pin, descriptor, usage, Some(span))
    }

    fn create_buffer_with_upload(
        &mut self,
        pin: BufferPin,
        mut descriptor: BufferDescriptor,
        usage: ResourceUsage,
        upload: Option<StagingSpan>,
    ) -> Result<TransientBufferId, GraphError> {
        self.ensure_empty_buffer(pin)?;
        if !usage.applies_to_buffers() {
            return Err(GraphicsError::InvalidParameter(format!("{usage:?} is not a buffer usage")).into());
        }
        descriptor.usage |= usage.buffer_usage();

        let upload = upload.filter(|span| span.size() > 0);
        // Uploads land before node 0, so the buffer is alive from the start of the frame.
        let range = match upload {
            Some(_) => {
                descriptor.usage |= BufferUsage::COPY_DST;
                LifetimeRange::new(0, self.node_index + 1)
            }
            None => LifetimeRange::single(self.node_index),
        };

        let id = self.pool.add_transient_buffer(descriptor, range);
        *storage_mut::<Option<TransientBufferId>>(self.storage, pin.storage_key())? = Some(id);

        if let Some(span) = upload {
            self.record.uploads.push(PendingUpload { span, buffer: id });
        }
        self.register(id.into());
        self.declare(id.into(), usage);
        log::trace!("Build: node {} created buffer {id}", self.node_index);
        Ok(id)
    }

    /// Create a texture that keeps its contents across frames.
    ///
    /// The pin's storage identifies the texture, so the same node pin gets the
    /// same texture every frame as long as the descriptor does not change.
    pub fn create_stable_texture(
        &mut self,
        pin: TexturePin,
        mut descriptor: TextureDescriptor,
        usage: ResourceUsage,
    ) -> Result<TransientTextureId, GraphError> {
        let stable = Self::stable_id(pin.storage_key())?;
        self.ensure_empty_texture(pin)?;
        descriptor.usage |= usage.texture_usage();

        let id = self.pool.add_stable_texture(descriptor, stable);
        *storage_mut::<Option<TransientTextureId>>(self.storage, pin.storage_key())? = Some(id);

        self.register(id.into());
        self.declare(id.into(), usage);
        Ok(id)
    }

    /// Buffer counterpart of [`create_stable_texture`](Self::create_stable_texture).
    pub fn create_stable_buffer(
        &mut self,
        pin: BufferPin,
        mut descriptor: BufferDescriptor,
        usage: ResourceUsage,
    ) -> Result<TransientBufferId, GraphError> {
        let stable = Self::stable_id(pin.storage_key())?;
        self.ensure_empty_buffer(pin)?;
        descriptor.usage |= usage.buffer_usage();

        let id = self.pool.add_stable_buffer(descriptor, stable);
        *storage_mut::<Option<TransientBufferId>>(self.storage, pin.storage_key())? = Some(id);

        self.register(id.into());
        self.declare(id.into(), usage);
        Ok(id)
    }

    /// Use the texture on `pin`, created by this or an earlier node.
    pub fn acquire_texture(&mut self, pin: TexturePin, usage: ResourceUsage) -> Result<TransientTextureId, GraphError> {
        let id = texture_id(self.storage, pin)?;
        self.pool.extend_lifetime(id, self.node_index)?;
        self.pool.add_texture_usage(id, usage.texture_usage())?;
        self.touch(id.into());
        self.declare(id.into(), usage);
        Ok(id)
    }

    /// Use the buffer on `pin`, created by this or an earlier node.
    pub fn acquire_buffer(&mut self, pin: BufferPin, usage: ResourceUsage) -> Result<TransientBufferId, GraphError> {
        if !usage.applies_to_buffers() {
            return Err(GraphicsError::InvalidParameter(format!("{usage:?} is not a buffer usage")).into());
        }
        let id = buffer_id(self.storage, pin)?;
        self.pool.extend_lifetime(id, self.node_index)?;
        self.pool.add_buffer_usage(id, usage.buffer_usage())?;
        self.touch(id.into());
        self.declare(id.into(), usage);
        Ok(id)
    }

    /// Forward the texture on `source` to `destination` unchanged.
    ///
    /// `destination` must be one of this node's own pins. Nodes reading it
    /// see the very resource the source carries, with no copy and no
    /// barrier of its own.
    pub fn reroute_texture(&mut self, source: TexturePin, destination: TexturePin) -> Result<TransientTextureId, GraphError> {
        self.ensure_owned(destination.storage_key())?;
        let id = texture_id(self.storage, source)?;
        self.ensure_empty_texture(destination)?;
        self.pool.extend_lifetime(id, self.node_index)?;
        *storage_mut::<Option<TransientTextureId>>(self.storage, destination.storage_key())? = Some(id);
        self.touch(id.into());
        log::trace!("Build: node {} rerouted texture {id}", self.node_index);
        Ok(id)
    }

    /// Buffer counterpart of [`reroute_texture`](Self::reroute_texture).
    pub fn reroute_buffer(&mut self, source: BufferPin, destination: BufferPin) -> Result<TransientBufferId, GraphError> {
        self.ensure_owned(destination.storage_key())?;
        let id = buffer_id(self.storage, source)?;
        self.ensure_empty_buffer(destination)?;
        self.pool.extend_lifetime(id, self.node_index)?;
        *storage_mut::<Option<TransientBufferId>>(self.storage, destination.storage_key())? = Some(id);
        self.touch(id.into());
        log::trace!("Build: node {} rerouted buffer {id}", self.node_index);
        Ok(id)
    }

    /// Put a texture owned elsewhere on `pin`. It enters the frame in `initial`.
    pub fn import_texture(
        &mut self,
        pin: TexturePin,
        texture: GpuTexture,
        descriptor: TextureDescriptor,
        initial: TrackedState,
    ) -> Result<TransientTextureId, GraphError> {
        self.ensure_empty_texture(pin)?;
        let id = self.pool.add_external_texture(texture, descriptor);
        *storage_mut::<Option<TransientTextureId>>(self.storage, pin.storage_key())? = Some(id);

        self.register(id.into());
        self.record.imports.insert(id.into(), initial);
        Ok(id)
    }

    /// Put a buffer owned elsewhere on `pin`. It enters the frame in `initial`.
    pub fn import_buffer(
        &mut self,
        pin: BufferPin,
        buffer: GpuBuffer,
        descriptor: BufferDescriptor,
        initial: TrackedState,
    ) -> Result<TransientBufferId, GraphError> {
        self.ensure_empty_buffer(pin)?;
        let id = self.pool.add_external_buffer(buffer, descriptor);
        *storage_mut::<Option<TransientBufferId>>(self.storage, pin.storage_key())? = Some(id);

        self.register(id.into());
        self.record.imports.insert(id.into(), initial);
        Ok(id)
    }

    pub fn texture_descriptor(&self, pin: TexturePin) -> Result<TextureDescriptor, GraphError> {
        let id = texture_id(self.storage, pin)?;
        self.pool
            .texture_descriptor(id)
            .cloned()
            .ok_or_else(|| GraphicsError::InvalidHandle("texture").into())
    }

    pub fn buffer_descriptor(&self, pin: BufferPin) -> Result<BufferDescriptor, GraphError> {
        let id = buffer_id(self.storage, pin)?;
        self.pool
            .buffer_descriptor(id)
            .cloned()
            .ok_or_else(|| GraphicsError::InvalidHandle("buffer").into())
    }

    /// Copy the buffer on `pin` back to the host after this node executes.
    pub fn download(&mut self, pin: BufferPin) -> Result<BufferDownload, GraphError> {
        let id = buffer_id(self.storage, pin)?;
        self.pool.extend_lifetime(id, self.node_index)?;
        self.pool.add_buffer_usage(id, ResourceUsage::Download.buffer_usage())?;
        self.touch(id.into());

        let target = BufferDownload::new();
        self.node.downloads.push(DownloadRequest {
            buffer: id,
            target: target.clone(),
        });
        Ok(target)
    }

    pub fn access<T: Default + 'static>(&self, pin: DataPin<T>) -> Result<&T, GraphError> {
        storage_ref(self.storage, pin.storage_key())
    }

    pub fn access_mut<T: Default + 'static>(&mut self, pin: DataPin<T>) -> Result<&mut T, GraphError> {
        storage_mut(self.storage, pin.storage_key())
    }

    /// Append to the sink this pin feeds.
    pub fn push_sink<T: 'static>(&mut self, pin: DataSinkPin<T>, value: T) -> Result<(), GraphError> {
        storage_mut::<Vec<T>>(self.storage, pin.storage_key())?.push(value);
        Ok(())
    }

    /// Everything pushed into this sink so far this frame.
    pub fn sink<T: 'static>(&self, pin: DataSinkPin<T>) -> Result<&[T], GraphError> {
        storage_ref::<Vec<T>>(self.storage, pin.storage_key()).map(Vec::as_slice)
    }

    fn stable_id(key: Option<StorageKey>) -> Result<StableId, GraphError> {
        let key = key.ok_or_else(|| GraphError::InvalidPin("pin is not bound to a graph".into()))?;
        Ok(StableId::new(
            (u64::from(key.index()) << 32) | u64::from(key.generation()),
        ))
    }

    fn ensure_owned(&self, key: Option<StorageKey>) -> Result<(), GraphError> {
        if is_sourced(&self.node.owned, key) {
            return Err(GraphError::InvalidPin(
                "only a pin of the building node can receive a reroute".into(),
            ));
        }
        Ok(())
    }

    fn ensure_empty_texture(&self, pin: TexturePin) -> Result<(), GraphError> {
        match storage_ref::<Option<TransientTextureId>>(self.storage, pin.storage_key())? {
            Some(existing) => Err(GraphError::InvalidPin(format!(
                "texture pin already holds {existing}"
            ))),
            None => Ok(()),
        }
    }

    fn ensure_empty_buffer(&self, pin: BufferPin) -> Result<(), GraphError> {
        match storage_ref::<Option<TransientBufferId>>(self.storage, pin.storage_key())? {
            Some(existing) => Err(GraphError::InvalidPin(format!(
                "buffer pin already holds {existing}"
            ))),
            None => Ok(()),
        }
    }

    fn register(&mut self, id: TransientId) {
        self.record.resources.push(id);
        self.record.owners.insert(id, self.subgraph);
    }

    fn touch(&mut self, id: TransientId) {
        if self.record.owners.get(&id).is_some_and(|owner| *owner != self.subgraph) {
            self.record.cross_subgraph.insert(id);
        }
    }

    fn declare(&mut self, resource: TransientId, usage: ResourceUsage) {
        self.node.usages.push(DeclaredUsage {
            resource,
            stage: usage.stage(self.pass),
            state: usage.state(),
        });
    }
}

/// Context for [`FrameGraphNode::execute`](super::FrameGraphNode::execute).
pub struct ExecuteContext<'a> {
    pub(crate) pool: &'a TransientPool,
    pub(crate) storage: &'a mut Arena<PinStorage>,
    pub(crate) staging: &'a mut StagingRing,
    pub(crate) commands: &'a mut CommandList,
    pub(crate) services: &'a ServiceRegistry,
    pub(crate) owned: &'a [StorageKey],
    pub(crate) frame_index: u64,
}

impl ExecuteContext<'_> {
    /// The device texture behind `pin`.
    pub fn texture(&self, pin: TexturePin) -> Result<GpuTexture, GraphError> {
        let id = texture_id(self.storage, pin)?;
        self.pool
            .get_texture(id)
            .ok_or_else(|| GraphicsError::InvalidHandle("texture").into())
    }

    /// The device buffer behind `pin`.
    pub fn buffer(&self, pin: BufferPin) -> Result<GpuBuffer, GraphError> {
        let id = buffer_id(self.storage, pin)?;
        self.pool
            .get_buffer(id)
            .ok_or_else(|| GraphicsError::InvalidHandle("buffer").into())
    }

    pub fn access<T: Default + 'static>(&self, pin: DataPin<T>) -> Result<&T, GraphError> {
        storage_ref(self.storage, pin.storage_key())
    }

    pub fn access_mut<T: Default + 'static>(&mut self, pin: DataPin<T>) -> Result<&mut T, GraphError> {
        storage_mut(self.storage, pin.storage_key())
    }

    pub fn sink<T: 'static>(&self, pin: DataSinkPin<T>) -> Result<&[T], GraphError> {
        storage_ref::<Vec<T>>(self.storage, pin.storage_key()).map(Vec::as_slice)
    }

    /// See [`BuildContext::has_source`].
    pub fn has_source<P: PinField>(&self, pin: P) -> bool {
        is_sourced(self.owned, pin.storage_key())
    }

    /// Frames the stable texture on `pin` has existed before this one.
    pub fn texture_frames_alive(&self, pin: TexturePin) -> Result<u32, GraphError> {
        let id = texture_id(self.storage, pin)?;
        self.pool
            .texture_frames_alive(id)
            .ok_or_else(|| GraphicsError::InvalidHandle("texture").into())
    }

    pub fn buffer_frames_alive(&self, pin: BufferPin) -> Result<u32, GraphError> {
        let id = buffer_id(self.storage, pin)?;
        self.pool
            .buffer_frames_alive(id)
            .ok_or_else(|| GraphicsError::InvalidHandle("buffer").into())
    }

    /// Stage `data` and record a copy into the buffer on `pin` at `offset`.
    ///
    /// The node must have declared [`ResourceUsage::TransferDestination`] on
    /// the buffer during build so it is in the copy state when this runs.
    pub fn upload(&mut self, pin: BufferPin, data: &[u8], offset: u64) -> Result<(), GraphError> {
        let id = buffer_id(self.storage, pin)?;
        let size = self
            .pool
            .buffer_descriptor(id)
            .map(|d| d.size)
            .ok_or(GraphicsError::InvalidHandle("buffer"))?;
        if offset + data.len() as u64 > size {
            return Err(GraphicsError::InvalidParameter(format!(
                "uploading {} bytes at offset {offset} into a {size} byte buffer",
                data.len()
            ))
            .into());
        }
        if data.is_empty() {
            return Ok(());
        }

        let buffer = self
            .pool
            .get_buffer(id)
            .ok_or(GraphicsError::InvalidHandle("buffer"))?;
        let span = self.staging.stage(data)?;
        self.commands
            .push(GpuCommand::MemoryBarrier(MemoryBarrier::HOST_TO_TRANSFER));
        self.staging.upload(self.commands, span, buffer, offset);
        Ok(())
    }

    pub fn commands(&mut self) -> &mut CommandList {
        self.commands
    }

    pub fn service<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.get()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_handle_is_shared() {
        let download = BufferDownload::new();
        let clone = download.clone();
        assert!(!download.is_ready());

        clone.fulfill(vec![1, 2, 3]);
        assert!(download.is_ready());
        assert_eq!(download.get(), Some(vec![1, 2, 3]));
        assert_eq!(download.try_take(), Some(vec![1, 2, 3]));
        assert!(!clone.is_ready());
    }

    #[test]
    fn test_compiled_frame_reset_keeps_nothing() {
        let mut frame = CompiledFrame::new_empty();
        frame
            .active_outputs
            .insert(StorageKey::from_raw_parts(1, 1));
        frame
            .record
            .cross_subgraph
            .insert(TransientId::Texture(TransientTextureId::from_raw_parts(0, 1)));
        frame.reset();
        assert!(frame.active_outputs.is_empty());
        assert!(frame.record.cross_subgraph.is_empty());
    }
}
