//! Transient resource pool.
//!
//! During build every node declares the textures and buffers it creates. The
//! pool records them as *logical* resources with a [`LifetimeRange`] over node
//! order. At the end of build, [`TransientPool::end_build`] assigns logical
//! resources to *slots* so that resources whose lifetimes do not overlap share
//! one backing allocation, then binds each slot to a *backing*: an idle
//! allocation from an earlier frame when one fits and the GPU is done with
//! it, a fresh device allocation otherwise.
//!
//! ```text
//!   node order:   0     1     2     3
//!   tex A       [─────)                    slot 0 ─► backing #4 (reused)
//!   tex B             [───────────)        slot 1 ─► backing #9 (new)
//!   tex C                   [─────)        slot 0 ─► backing #4
//! ```
//!
//! Besides transient resources the pool also hands out *stable* resources,
//! which persist across frames keyed by a [`StableId`] and their descriptor,
//! and wraps *external* resources it does not own so that the graph can
//! treat every resource uniformly.
//!
//! Backings are never destroyed while the GPU may still use them: a backing
//! used by a frame is stamped with that frame's submission index in
//! [`TransientPool::finish_frame`], and destruction always goes through
//! [`SubmissionContext::destroy_deferred`].

mod lifetime;
mod resource;

pub use lifetime::{LifetimeRange, assign_slots};
pub use resource::{BufferResource, PoolResource, TextureResource};

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use redlilium_core::handle::{Arena, Handle};

use crate::backend::{GpuBuffer, GpuDevice, GpuTexture};
use crate::config::PoolConfig;
use crate::error::GraphicsError;
use crate::state::TrackedState;
use crate::submission::SubmissionContext;
use crate::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureUsage};

/// Identity of a resource that persists across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StableId(u64);

impl StableId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Where a logical resource's memory comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceOrigin {
    /// Aliased pool memory, contents undefined at the start of the frame.
    Transient,
    /// Persistent pool memory keyed by a [`StableId`].
    Stable(StableId),
    /// Owned by someone else.
    External,
}

enum Source<R: PoolResource> {
    Transient,
    Stable(StableId),
    External(R::Gpu),
}

/// A logical resource declared during build.
pub struct Transient<R: PoolResource> {
    descriptor: R::Descriptor,
    range: LifetimeRange,
    source: Source<R>,
    slot: Option<usize>,
    resolved: Option<R::Gpu>,
    /// Frames since a stable resource was created; 0 for everything else.
    frames_alive: u32,
}

pub type TransientTextureId = Handle<Transient<TextureResource>>;
pub type TransientBufferId = Handle<Transient<BufferResource>>;

/// Either kind of logical resource id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientId {
    Texture(TransientTextureId),
    Buffer(TransientBufferId),
}

impl From<TransientTextureId> for TransientId {
    fn from(id: TransientTextureId) -> Self {
        Self::Texture(id)
    }
}

impl From<TransientBufferId> for TransientId {
    fn from(id: TransientBufferId) -> Self {
        Self::Buffer(id)
    }
}

/// A device allocation owned by the pool.
struct Backing<R: PoolResource> {
    gpu: R::Gpu,
    descriptor: R::Descriptor,
    /// Last submission that used the backing.
    last_submit: u64,
    last_used_frame: u64,
}

struct StableEntry<R: PoolResource> {
    gpu: R::Gpu,
    created_frame: u64,
    last_used_frame: u64,
    tracking: Option<TrackedState>,
}

/// Per-kind bookkeeping.
struct ResourceTable<R: PoolResource> {
    logical: Arena<Transient<R>>,
    slot_count: usize,
    /// Backings bound to this frame's slots, indexed by slot.
    in_use: Vec<Backing<R>>,
    /// Backings from earlier frames, possibly still in flight.
    idle: Vec<Backing<R>>,
    stable: HashMap<(StableId, R::Descriptor), StableEntry<R>>,
}

impl<R: PoolResource> Default for ResourceTable<R> {
    fn default() -> Self {
        Self {
            logical: Arena::new(),
            slot_count: 0,
            in_use: Vec::new(),
            idle: Vec::new(),
            stable: HashMap::new(),
        }
    }
}

/// Everything [`ResourceTable::resolve`] needs from the outside.
struct ResolveContext<'a> {
    device: &'a dyn GpuDevice,
    last_finished: u64,
    frame: u64,
    max_slots: Option<usize>,
}

impl<R: PoolResource> ResourceTable<R> {
    fn add(&mut self, descriptor: R::Descriptor, range: LifetimeRange, source: Source<R>) -> Handle<Transient<R>> {
        self.logical.insert(Transient {
            descriptor,
            range,
            source,
            slot: None,
            resolved: None,
            frames_alive: 0,
        })
    }

    fn entry_mut(&mut self, id: Handle<Transient<R>>) -> Result<&mut Transient<R>, GraphicsError> {
        self.logical
            .get_mut(id)
            .ok_or(GraphicsError::InvalidHandle(R::KIND))
    }

    fn extend_lifetime(&mut self, id: Handle<Transient<R>>, index: u32) -> Result<(), GraphicsError> {
        self.entry_mut(id)?.range.extend(index);
        Ok(())
    }

    fn add_usage(&mut self, id: Handle<Transient<R>>, usage: R::Usage) -> Result<(), GraphicsError> {
        let entry = self.entry_mut(id)?;
        let merged = R::usage(&entry.descriptor) | usage;
        R::set_usage(&mut entry.descriptor, merged);
        Ok(())
    }

    /// Take an idle backing that fits `descriptor` and that the GPU is done with.
    fn take_idle(&mut self, descriptor: &R::Descriptor, last_finished: u64) -> Option<Backing<R>> {
        let index = self
            .idle
            .iter()
            .position(|b| b.last_submit <= last_finished && R::backing_fits(&b.descriptor, descriptor))?;
        Some(self.idle.swap_remove(index))
    }

    fn resolve(&mut self, ctx: &ResolveContext<'_>) -> Result<(), GraphicsError> {
        let transients: Vec<_> = self
            .logical
            .iter()
            .filter(|(_, entry)| matches!(entry.source, Source::Transient))
            .map(|(handle, entry)| (handle, (entry.range, entry.descriptor.clone())))
            .collect();

        let items: Vec<_> = transients.iter().map(|(_, item)| item.clone()).collect();
        let (assignment, slot_count) = assign_slots(&items, |a, b| R::can_share_slot(a, b));

        if let Some(capacity) = ctx.max_slots
            && slot_count > capacity
        {
            return Err(GraphicsError::PoolExhausted {
                required: slot_count,
                capacity,
            });
        }

        let mut slot_descriptors: Vec<Option<R::Descriptor>> = vec![None; slot_count];
        for ((_, (_, descriptor)), &slot) in transients.iter().zip(&assignment) {
            match &mut slot_descriptors[slot] {
                Some(existing) => R::merge_into_slot(existing, descriptor),
                empty => *empty = Some(descriptor.clone()),
            }
        }

        for descriptor in slot_descriptors.into_iter().flatten() {
            let backing = match self.take_idle(&descriptor, ctx.last_finished) {
                Some(backing) => {
                    log::trace!("Pool: reusing {} {}", R::KIND, backing.gpu);
                    backing
                }
                None => {
                    let gpu = R::create(ctx.device, &descriptor)?;
                    log::trace!("Pool: created {} {gpu} for {descriptor:?}", R::KIND);
                    Backing {
                        gpu,
                        descriptor,
                        last_submit: 0,
                        last_used_frame: ctx.frame,
                    }
                }
            };
            self.in_use.push(backing);
        }
        self.slot_count = slot_count;

        for ((handle, _), &slot) in transients.iter().zip(&assignment) {
            let gpu = self.in_use[slot].gpu;
            let entry = &mut self.logical[*handle];
            entry.slot = Some(slot);
            entry.resolved = Some(gpu);
        }

        let handles = self.logical.handles();
        for handle in handles {
            let entry = &self.logical[handle];
            let (resolved, frames_alive) = match entry.source {
                Source::Transient => continue,
                Source::External(gpu) => (gpu, 0),
                Source::Stable(id) => {
                    let stable = match self.stable.entry((id, entry.descriptor.clone())) {
                        Entry::Occupied(occupied) => occupied.into_mut(),
                        Entry::Vacant(vacant) => {
                            let gpu = R::create(ctx.device, &vacant.key().1)?;
                            log::trace!("Pool: created stable {} {gpu} ({id:?})", R::KIND);
                            vacant.insert(StableEntry {
                                gpu,
                                created_frame: ctx.frame,
                                last_used_frame: ctx.frame,
                                tracking: None,
                            })
                        }
                    };
                    stable.last_used_frame = ctx.frame;
                    let alive = ctx.frame.saturating_sub(stable.created_frame);
                    (stable.gpu, u32::try_from(alive).unwrap_or(u32::MAX))
                }
            };
            let entry = &mut self.logical[handle];
            entry.resolved = Some(resolved);
            entry.frames_alive = frames_alive;
        }

        Ok(())
    }

    fn release_unused(&mut self, frame: u64, config: &PoolConfig, submission: &mut SubmissionContext) {
        let current = submission.get_submit_index();

        let stale: Vec<_> = self
            .stable
            .iter()
            .filter(|(_, entry)| frame.saturating_sub(entry.last_used_frame) >= config.stable_frames_before_release.max(1))
            .map(|(key, _)| key.clone())
            .collect();

        for key in stale {
            if let Some(entry) = self.stable.remove(&key) {
                log::trace!(
                    "Pool: releasing stable {} {} (created in frame {}, last used in frame {})",
                    R::KIND,
                    entry.gpu,
                    entry.created_frame,
                    entry.last_used_frame
                );
                submission.destroy_deferred(entry.gpu, current);
            }
        }

        let mut index = 0;
        while index < self.idle.len() {
            if frame.saturating_sub(self.idle[index].last_used_frame) > config.max_idle_frames {
                let backing = self.idle.swap_remove(index);
                log::trace!("Pool: destroying idle {} {}", R::KIND, backing.gpu);
                submission.destroy_deferred(backing.gpu, backing.last_submit);
            } else {
                index += 1;
            }
        }
    }

    fn finish_frame(&mut self, submit_index: u64, frame: u64) {
        for mut backing in self.in_use.drain(..) {
            backing.last_submit = submit_index;
            backing.last_used_frame = frame;
            self.idle.push(backing);
        }
        self.logical.clear();
        self.slot_count = 0;
    }

    fn abort(&mut self) {
        self.idle.append(&mut self.in_use);
        self.logical.clear();
        self.slot_count = 0;
    }

    fn stable_entry_mut(&mut self, id: Handle<Transient<R>>) -> Option<&mut StableEntry<R>> {
        let entry = self.logical.get(id)?;
        let Source::Stable(stable) = entry.source else {
            return None;
        };
        let key = (stable, entry.descriptor.clone());
        self.stable.get_mut(&key)
    }

    fn origin(&self, id: Handle<Transient<R>>) -> Option<ResourceOrigin> {
        self.logical.get(id).map(|entry| match entry.source {
            Source::Transient => ResourceOrigin::Transient,
            Source::Stable(id) => ResourceOrigin::Stable(id),
            Source::External(_) => ResourceOrigin::External,
        })
    }

    fn destroy_all(&mut self, submission: &mut SubmissionContext) {
        let current = submission.get_submit_index();
        for backing in self.in_use.drain(..).chain(self.idle.drain(..)) {
            submission.destroy_deferred(backing.gpu, current.max(backing.last_submit));
        }
        for (_, entry) in self.stable.drain() {
            submission.destroy_deferred(entry.gpu, current);
        }
        self.logical.clear();
        self.slot_count = 0;
    }
}

/// Where the pool is in the build/finish cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Between `begin_build` and `end_build`.
    Building,
    /// Backings bound, waiting for `finish_frame`.
    Built,
}

/// Lifetime-aliasing pool for textures and buffers.
pub struct TransientPool {
    config: PoolConfig,
    frame: u64,
    phase: Phase,
    textures: ResourceTable<TextureResource>,
    buffers: ResourceTable<BufferResource>,
}

impl TransientPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            frame: 0,
            phase: Phase::Idle,
            textures: ResourceTable::default(),
            buffers: ResourceTable::default(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start declaring resources for `frame`.
    ///
    /// A previous frame that was built but never finished is dropped first.
    /// Its backings were never submitted, so they go back to the idle list
    /// with the submission stamps they already carried.
    pub fn begin_build(&mut self, frame: u64) {
        match self.phase {
            Phase::Idle => {}
            Phase::Building => {
                log::warn!("Pool: begin_build({frame}) while frame {} is still building", self.frame);
                self.abort_build();
            }
            Phase::Built => {
                log::debug!("Pool: frame {} was built but never finished, dropping it", self.frame);
                self.abort_build();
            }
        }
        self.frame = frame;
        self.phase = Phase::Building;
    }

    pub fn add_transient_texture(&mut self, descriptor: TextureDescriptor, range: LifetimeRange) -> TransientTextureId {
        self.textures.add(descriptor, range, Source::Transient)
    }

    pub fn add_transient_buffer(&mut self, descriptor: BufferDescriptor, range: LifetimeRange) -> TransientBufferId {
        self.buffers.add(descriptor, range, Source::Transient)
    }

    /// Wrap a texture the pool does not own.
    pub fn add_external_texture(&mut self, texture: GpuTexture, descriptor: TextureDescriptor) -> TransientTextureId {
        self.textures.add(descriptor, LifetimeRange::single(0), Source::External(texture))
    }

    /// Wrap a buffer the pool does not own.
    pub fn add_external_buffer(&mut self, buffer: GpuBuffer, descriptor: BufferDescriptor) -> TransientBufferId {
        self.buffers.add(descriptor, LifetimeRange::single(0), Source::External(buffer))
    }

    /// Request a texture that keeps its contents across frames.
    pub fn add_stable_texture(&mut self, descriptor: TextureDescriptor, id: StableId) -> TransientTextureId {
        self.textures.add(descriptor, LifetimeRange::single(0), Source::Stable(id))
    }

    /// Request a buffer that keeps its contents across frames.
    pub fn add_stable_buffer(&mut self, descriptor: BufferDescriptor, id: StableId) -> TransientBufferId {
        self.buffers.add(descriptor, LifetimeRange::single(0), Source::Stable(id))
    }

    /// Grow a resource's lifetime to include the node at `index`.
    pub fn extend_lifetime(&mut self, id: impl Into<TransientId>, index: u32) -> Result<(), GraphicsError> {
        match id.into() {
            TransientId::Texture(id) => self.textures.extend_lifetime(id, index),
            TransientId::Buffer(id) => self.buffers.extend_lifetime(id, index),
        }
    }

    pub fn add_texture_usage(&mut self, id: TransientTextureId, usage: TextureUsage) -> Result<(), GraphicsError> {
        self.textures.add_usage(id, usage)
    }

    pub fn add_buffer_usage(&mut self, id: TransientBufferId, usage: BufferUsage) -> Result<(), GraphicsError> {
        self.buffers.add_usage(id, usage)
    }

    /// Assign slots and bind backings for everything declared since `begin_build`.
    ///
    /// On error nothing is committed: the frame's logical resources are
    /// dropped and backings bound so far go back to the idle list.
    pub fn end_build(&mut self, submission: &mut SubmissionContext) -> Result<(), GraphicsError> {
        redlilium_core::profile_scope!("pool::end_build");

        if self.phase != Phase::Building {
            return Err(GraphicsError::Internal("end_build without begin_build".into()));
        }

        let last_finished = submission.poll_completion();
        let device = submission.device().clone();
        let ctx = ResolveContext {
            device: device.as_ref(),
            last_finished,
            frame: self.frame,
            max_slots: self.config.max_transient_slots,
        };

        let result = self
            .textures
            .resolve(&ctx)
            .and_then(|()| self.buffers.resolve(&ctx));

        if let Err(err) = result {
            log::warn!("Pool: frame {} failed to bind resources: {err}", self.frame);
            self.abort_build();
            return Err(err);
        }

        self.textures.release_unused(self.frame, &self.config, submission);
        self.buffers.release_unused(self.frame, &self.config, submission);
        self.phase = Phase::Built;

        log::debug!(
            "Pool: frame {} bound {} texture slots ({} logical), {} buffer slots ({} logical)",
            self.frame,
            self.textures.slot_count,
            self.textures.logical.len(),
            self.buffers.slot_count,
            self.buffers.logical.len()
        );
        redlilium_core::profile_plot!("texture slots", self.textures.slot_count);
        redlilium_core::profile_plot!("buffer slots", self.buffers.slot_count);

        Ok(())
    }

    /// Drop this frame's logical resources without touching backing memory.
    pub fn abort_build(&mut self) {
        self.textures.abort();
        self.buffers.abort();
        self.phase = Phase::Idle;
    }

    /// Stamp the backings used this frame with `submit_index` and forget
    /// the frame's logical resources.
    pub fn finish_frame(&mut self, submit_index: u64) {
        self.textures.finish_frame(submit_index, self.frame);
        self.buffers.finish_frame(submit_index, self.frame);
        self.phase = Phase::Idle;
    }

    pub fn get_texture(&self, id: TransientTextureId) -> Option<GpuTexture> {
        self.textures.logical.get(id)?.resolved
    }

    pub fn get_buffer(&self, id: TransientBufferId) -> Option<GpuBuffer> {
        self.buffers.logical.get(id)?.resolved
    }

    pub fn texture_descriptor(&self, id: TransientTextureId) -> Option<&TextureDescriptor> {
        self.textures.logical.get(id).map(|e| &e.descriptor)
    }

    pub fn buffer_descriptor(&self, id: TransientBufferId) -> Option<&BufferDescriptor> {
        self.buffers.logical.get(id).map(|e| &e.descriptor)
    }

    pub fn texture_range(&self, id: TransientTextureId) -> Option<LifetimeRange> {
        self.textures.logical.get(id).map(|e| e.range)
    }

    pub fn buffer_range(&self, id: TransientBufferId) -> Option<LifetimeRange> {
        self.buffers.logical.get(id).map(|e| e.range)
    }

    /// Frames a stable texture has existed before this one, 0 in the frame
    /// it was created. Transient and external textures always report 0.
    pub fn texture_frames_alive(&self, id: TransientTextureId) -> Option<u32> {
        self.textures.logical.get(id).map(|e| e.frames_alive)
    }

    pub fn buffer_frames_alive(&self, id: TransientBufferId) -> Option<u32> {
        self.buffers.logical.get(id).map(|e| e.frames_alive)
    }

    /// Slot a transient texture was assigned to; `None` for stable and external ones.
    pub fn slot_of_texture(&self, id: TransientTextureId) -> Option<usize> {
        self.textures.logical.get(id)?.slot
    }

    pub fn slot_of_buffer(&self, id: TransientBufferId) -> Option<usize> {
        self.buffers.logical.get(id)?.slot
    }

    pub fn texture_origin(&self, id: TransientTextureId) -> Option<ResourceOrigin> {
        self.textures.origin(id)
    }

    pub fn buffer_origin(&self, id: TransientBufferId) -> Option<ResourceOrigin> {
        self.buffers.origin(id)
    }

    /// Remember the tracked state of a stable resource for the next frame.
    pub fn store_tracking(&mut self, id: impl Into<TransientId>, state: TrackedState) {
        let entry_tracking = match id.into() {
            TransientId::Texture(id) => self.textures.stable_entry_mut(id).map(|e| &mut e.tracking),
            TransientId::Buffer(id) => self.buffers.stable_entry_mut(id).map(|e| &mut e.tracking),
        };
        match entry_tracking {
            Some(tracking) => *tracking = Some(state),
            None => log::warn!("Pool: store_tracking on a resource that is not stable"),
        }
    }

    /// Tracked state stored by an earlier frame, if any.
    pub fn fetch_tracking(&mut self, id: impl Into<TransientId>) -> Option<TrackedState> {
        match id.into() {
            TransientId::Texture(id) => self.textures.stable_entry_mut(id)?.tracking,
            TransientId::Buffer(id) => self.buffers.stable_entry_mut(id)?.tracking,
        }
    }

    pub fn texture_slot_count(&self) -> usize {
        self.textures.slot_count
    }

    pub fn buffer_slot_count(&self) -> usize {
        self.buffers.slot_count
    }

    /// Backings not bound to the current frame.
    pub fn idle_backing_count(&self) -> usize {
        self.textures.idle.len() + self.buffers.idle.len()
    }

    pub fn stable_count(&self) -> usize {
        self.textures.stable.len() + self.buffers.stable.len()
    }

    /// Hand every allocation to deferred destruction.
    pub fn shutdown(&mut self, submission: &mut SubmissionContext) {
        log::info!(
            "Pool: shutting down ({} idle backings, {} stable resources)",
            self.idle_backing_count(),
            self.stable_count()
        );
        self.textures.destroy_all(submission);
        self.buffers.destroy_all(submission);
        self.phase = Phase::Idle;
    }
}

impl std::fmt::Debug for TransientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransientPool")
            .field("frame", &self.frame)
            .field("texture_slots", &self.textures.slot_count)
            .field("buffer_slots", &self.buffers.slot_count)
            .field("idle", &self.idle_backing_count())
            .field("stable", &self.stable_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{CommandList, DummyDevice};
    use crate::config::SubmissionConfig;
    use crate::state::{PipelineStage, ResourceState};
    use crate::types::TextureFormat;

    fn setup(device: &Arc<DummyDevice>) -> SubmissionContext {
        SubmissionContext::new(
            device.clone(),
            SubmissionConfig::default().with_max_submits_in_flight(4),
        )
    }

    fn color(width: u32) -> TextureDescriptor {
        TextureDescriptor::new_2d(
            width,
            width,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        )
    }

    fn submit_frame(pool: &mut TransientPool, submission: &mut SubmissionContext) {
        let index = submission.submit_begin().unwrap();
        pool.finish_frame(index);
        submission.submit_end(CommandList::new(), &[], &[]).unwrap();
    }

    #[test]
    fn test_disjoint_textures_alias() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(64), LifetimeRange::new(0, 1));
        let b = pool.add_transient_texture(color(64), LifetimeRange::new(1, 2));
        pool.end_build(&mut submission).unwrap();

        assert_eq!(pool.slot_of_texture(a), pool.slot_of_texture(b));
        assert_eq!(pool.get_texture(a), pool.get_texture(b));
        assert_eq!(pool.texture_slot_count(), 1);
        assert_eq!(device.stats().textures_created, 1);
    }

    #[test]
    fn test_overlapping_or_different_shapes_do_not_alias() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(64), LifetimeRange::new(0, 2));
        let b = pool.add_transient_texture(color(64), LifetimeRange::new(1, 2));
        let c = pool.add_transient_texture(color(32), LifetimeRange::new(2, 3));
        pool.end_build(&mut submission).unwrap();

        assert_ne!(pool.get_texture(a), pool.get_texture(b));
        assert_ne!(pool.slot_of_texture(c), pool.slot_of_texture(a));
        assert_eq!(pool.texture_slot_count(), 3);
    }

    #[test]
    fn test_buffers_share_slot_and_grow() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let small = pool.add_transient_buffer(
            BufferDescriptor::new(64, BufferUsage::STORAGE),
            LifetimeRange::new(0, 1),
        );
        let large = pool.add_transient_buffer(
            BufferDescriptor::new(256, BufferUsage::INDIRECT),
            LifetimeRange::new(1, 2),
        );
        pool.end_build(&mut submission).unwrap();

        assert_eq!(pool.get_buffer(small), pool.get_buffer(large));
        assert_eq!(device.stats().allocated_bytes, 256);
    }

    #[test]
    fn test_usage_is_accumulated() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(16), LifetimeRange::new(0, 1));
        pool.add_texture_usage(a, TextureUsage::SAMPLED).unwrap();
        pool.extend_lifetime(a, 3).unwrap();
        pool.end_build(&mut submission).unwrap();

        assert_eq!(pool.texture_range(a), Some(LifetimeRange::new(0, 4)));
        let texture = pool.get_texture(a).unwrap();
        let usage = device.texture_descriptor(texture).map(|d| d.usage);
        assert_eq!(
            usage,
            Some(TextureUsage::RENDER_ATTACHMENT | TextureUsage::SAMPLED)
        );
    }

    #[test]
    fn test_backing_reused_only_after_completion() {
        let device = Arc::new(DummyDevice::with_manual_completion());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(64), LifetimeRange::new(0, 1));
        pool.end_build(&mut submission).unwrap();
        let first = pool.get_texture(a);
        submit_frame(&mut pool, &mut submission);

        // Submission 1 still in flight: a second backing is needed.
        pool.begin_build(2);
        let b = pool.add_transient_texture(color(64), LifetimeRange::new(0, 1));
        pool.end_build(&mut submission).unwrap();
        assert_ne!(pool.get_texture(b), first);
        submit_frame(&mut pool, &mut submission);

        device.complete_through(1);
        pool.begin_build(3);
        let c = pool.add_transient_texture(color(64), LifetimeRange::new(0, 1));
        pool.end_build(&mut submission).unwrap();
        assert_eq!(pool.get_texture(c), first);
        assert_eq!(device.stats().textures_created, 2);
    }

    #[test]
    fn test_slot_limit() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default().with_max_transient_slots(1));

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(8), LifetimeRange::new(0, 2));
        pool.add_transient_texture(color(8), LifetimeRange::new(1, 2));
        assert_eq!(
            pool.end_build(&mut submission),
            Err(GraphicsError::PoolExhausted {
                required: 2,
                capacity: 1
            })
        );

        // The frame is discarded and nothing was allocated.
        assert_eq!(pool.get_texture(a), None);
        assert_eq!(device.stats().textures_created, 0);
    }

    #[test]
    fn test_out_of_memory_keeps_previous_backings() {
        let device = Arc::new(DummyDevice::new().with_memory_budget(64 * 64 * 4));
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        pool.add_transient_texture(color(64), LifetimeRange::new(0, 1));
        pool.end_build(&mut submission).unwrap();
        submit_frame(&mut pool, &mut submission);

        pool.begin_build(2);
        pool.add_transient_texture(color(64), LifetimeRange::new(0, 2));
        pool.add_transient_texture(color(64), LifetimeRange::new(1, 2));
        assert_eq!(
            pool.end_build(&mut submission),
            Err(GraphicsError::OutOfMemory)
        );
        assert_eq!(pool.idle_backing_count(), 1);
        assert_eq!(device.stats().live_textures, 1);
    }

    #[test]
    fn test_unfinished_frame_is_dropped_by_next_build() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(64), LifetimeRange::new(0, 2));
        pool.add_transient_texture(color(64), LifetimeRange::new(1, 2));
        pool.end_build(&mut submission).unwrap();
        let first = pool.get_texture(a);

        // Frame 1 is never finished.
        pool.begin_build(2);
        assert_eq!(pool.get_texture(a), None);
        assert_eq!(pool.idle_backing_count(), 2);

        let b = pool.add_transient_texture(color(64), LifetimeRange::new(0, 2));
        let c = pool.add_transient_texture(color(64), LifetimeRange::new(1, 2));
        pool.end_build(&mut submission).unwrap();
        assert_eq!(pool.texture_slot_count(), 2);
        assert_eq!(pool.idle_backing_count(), 0);
        assert_ne!(pool.get_texture(b), pool.get_texture(c));
        assert!([pool.get_texture(b), pool.get_texture(c)].contains(&first));
        assert_eq!(device.stats().textures_created, 2);

        submit_frame(&mut pool, &mut submission);
        assert_eq!(pool.idle_backing_count(), 2);
    }

    #[test]
    fn test_stable_texture_persists_and_keeps_state() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());
        let id = StableId::new(7);

        pool.begin_build(1);
        let a = pool.add_stable_texture(color(32), id);
        pool.end_build(&mut submission).unwrap();
        assert_eq!(pool.texture_origin(a), Some(ResourceOrigin::Stable(id)));
        assert_eq!(pool.fetch_tracking(a), None);
        assert_eq!(pool.texture_frames_alive(a), Some(0));

        let state = TrackedState {
            stage: PipelineStage::Compute,
            state: ResourceState::StorageWrite,
        };
        pool.store_tracking(a, state);
        let first = pool.get_texture(a);
        submit_frame(&mut pool, &mut submission);

        pool.begin_build(2);
        let b = pool.add_stable_texture(color(32), id);
        pool.end_build(&mut submission).unwrap();
        assert_eq!(pool.get_texture(b), first);
        assert_eq!(pool.texture_frames_alive(b), Some(1));
        assert_eq!(pool.fetch_tracking(b), Some(state));
        assert_eq!(pool.slot_of_texture(b), None);
        submit_frame(&mut pool, &mut submission);

        // Not requested in frame 3: released through deferred destruction.
        pool.begin_build(3);
        pool.end_build(&mut submission).unwrap();
        assert_eq!(pool.stable_count(), 0);
        assert_eq!(submission.pending_destruction_count(), 1);
    }

    #[test]
    fn test_external_resources_pass_through() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());
        let swapchain = GpuTexture::from_raw(1000);

        pool.begin_build(1);
        let id = pool.add_external_texture(swapchain, color(128));
        pool.end_build(&mut submission).unwrap();

        assert_eq!(pool.get_texture(id), Some(swapchain));
        assert_eq!(pool.texture_origin(id), Some(ResourceOrigin::External));
        assert_eq!(device.stats().textures_created, 0);
    }

    #[test]
    fn test_idle_backings_expire() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default().with_max_idle_frames(1));

        pool.begin_build(1);
        pool.add_transient_buffer(
            BufferDescriptor::new(32, BufferUsage::STORAGE),
            LifetimeRange::new(0, 1),
        );
        pool.end_build(&mut submission).unwrap();
        submit_frame(&mut pool, &mut submission);

        for frame in 2..=3 {
            pool.begin_build(frame);
            pool.end_build(&mut submission).unwrap();
            submit_frame(&mut pool, &mut submission);
        }

        assert_eq!(pool.idle_backing_count(), 0);
        submission.submit_begin().unwrap();
        assert_eq!(device.stats().live_buffers, 0);
    }

    #[test]
    fn test_stale_ids_do_not_resolve() {
        let device = Arc::new(DummyDevice::new());
        let mut submission = setup(&device);
        let mut pool = TransientPool::new(PoolConfig::default());

        pool.begin_build(1);
        let a = pool.add_transient_texture(color(8), LifetimeRange::new(0, 1));
        pool.end_build(&mut submission).unwrap();
        submit_frame(&mut pool, &mut submission);

        assert_eq!(pool.get_texture(a), None);
        assert_eq!(
            pool.extend_lifetime(a, 2),
            Err(GraphicsError::InvalidHandle("texture"))
        );
    }
}
