//! Dummy GPU device for testing and headless runs.
//!
//! This device doesn't talk to any graphics API. Buffers are plain host
//! memory, textures are descriptors, and the only commands that do anything at
//! submit time are buffer copies, which is enough to exercise the staging
//! ring end to end. Everything else is recorded so tests can inspect it.
//!
//! Completion can be automatic (every submission completes immediately) or
//! manual, where tests drive [`DummyDevice::complete_through`] to simulate a
//! GPU lagging several submissions behind.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use super::{
    CommandList, GpuBuffer, GpuCommand, GpuDevice, GpuResource, GpuSemaphore, GpuTexture,
    Submission,
};
use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, TextureDescriptor};

/// Counters exposed for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub buffers_created: u64,
    pub textures_created: u64,
    pub resources_destroyed: u64,
    pub submissions: u64,
    pub live_buffers: usize,
    pub live_textures: usize,
    pub allocated_bytes: u64,
}

#[derive(Debug)]
struct DummyBuffer {
    size: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    buffers: HashMap<GpuBuffer, DummyBuffer>,
    textures: HashMap<GpuTexture, TextureDescriptor>,
    semaphores: HashSet<GpuSemaphore>,
    last_submitted: u64,
    completed: u64,
    submissions: Vec<(u64, CommandList)>,
    stats: DeviceStats,
    lost: bool,
}

/// In-memory [`GpuDevice`].
#[derive(Debug)]
pub struct DummyDevice {
    state: Mutex<DummyState>,
    auto_complete: bool,
    memory_budget: Option<u64>,
}

impl DummyDevice {
    /// Create a device whose submissions complete immediately.
    pub fn new() -> Self {
        log::info!("DummyDevice: created");
        Self {
            state: Mutex::new(DummyState::default()),
            auto_complete: true,
            memory_budget: None,
        }
    }

    /// Create a device whose submissions only complete through
    /// [`complete_through`](Self::complete_through) or a blocking wait.
    pub fn with_manual_completion() -> Self {
        Self {
            auto_complete: false,
            ..Self::new()
        }
    }

    /// Fail allocations once `bytes` of device memory are in use.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Mark every submission up to `index` (inclusive) as complete.
    pub fn complete_through(&self, index: u64) {
        let mut state = self.state.lock();
        let index = index.min(state.last_submitted);
        if index > state.completed {
            log::trace!("DummyDevice: completed submissions up to {index}");
            state.completed = index;
        }
    }

    /// Mark every submission as complete.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        state.completed = state.last_submitted;
    }

    /// Simulate a lost device: every later call fails with `DeviceLost`.
    pub fn lose_device(&self) {
        self.state.lock().lost = true;
    }

    pub fn stats(&self) -> DeviceStats {
        let state = self.state.lock();
        DeviceStats {
            live_buffers: state.buffers.len(),
            live_textures: state.textures.len(),
            ..state.stats
        }
    }

    /// Whether the resource has been created and not destroyed yet.
    pub fn is_alive(&self, resource: GpuResource) -> bool {
        let state = self.state.lock();
        match resource {
            GpuResource::Buffer(b) => state.buffers.contains_key(&b),
            GpuResource::Texture(t) => state.textures.contains_key(&t),
            GpuResource::Semaphore(s) => state.semaphores.contains(&s),
        }
    }

    /// Descriptor of a live texture.
    pub fn texture_descriptor(&self, texture: GpuTexture) -> Option<TextureDescriptor> {
        self.state.lock().textures.get(&texture).cloned()
    }

    /// Drain the command lists submitted so far, with their submission index.
    pub fn take_submissions(&self) -> Vec<(u64, CommandList)> {
        std::mem::take(&mut self.state.lock().submissions)
    }

    fn allocate_id(state: &mut DummyState) -> u64 {
        state.next_id += 1;
        state.next_id
    }

    fn reserve_memory(&self, state: &mut DummyState, bytes: u64) -> Result<(), GraphicsError> {
        if let Some(budget) = self.memory_budget
            && state.stats.allocated_bytes + bytes > budget
        {
            log::warn!(
                "DummyDevice: allocation of {bytes} bytes exceeds budget ({} of {budget} used)",
                state.stats.allocated_bytes
            );
            return Err(GraphicsError::OutOfMemory);
        }

        state.stats.allocated_bytes += bytes;
        Ok(())
    }

    fn execute_copies(state: &mut DummyState, commands: &CommandList) {
        for command in commands.commands() {
            let GpuCommand::CopyBuffer { src, dst, regions } = command else {
                continue;
            };

            for region in regions {
                let mut bytes = vec![0u8; region.size as usize];
                if let Some(src) = state.buffers.get(src) {
                    read_into(src, region.src_offset, &mut bytes);
                }
                if let Some(dst) = state.buffers.get_mut(dst) {
                    write_from(dst, region.dst_offset, &bytes);
                }
            }
        }
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn read_into(buffer: &DummyBuffer, offset: u64, out: &mut [u8]) {
    let start = offset as usize;
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = buffer.data.get(start + i).copied().unwrap_or(0);
    }
}

fn write_from(buffer: &mut DummyBuffer, offset: u64, data: &[u8]) {
    let start = offset as usize;
    let end = start + data.len();
    if buffer.data.len() < end {
        buffer.data.resize(end, 0);
    }
    buffer.data[start..end].copy_from_slice(data);
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy Device"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<GpuBuffer, GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be greater than 0".into(),
            ));
        }

        self.reserve_memory(&mut state, descriptor.size)?;

        let buffer = GpuBuffer::from_raw(Self::allocate_id(&mut state));
        log::trace!(
            "DummyDevice: creating {buffer} {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );

        state.buffers.insert(
            buffer,
            DummyBuffer {
                size: descriptor.size,
                data: Vec::new(),
            },
        );
        state.stats.buffers_created += 1;

        Ok(buffer)
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<GpuTexture, GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }

        self.reserve_memory(&mut state, descriptor.byte_size())?;

        let texture = GpuTexture::from_raw(Self::allocate_id(&mut state));
        log::trace!(
            "DummyDevice: creating {texture} {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );

        state.textures.insert(texture, descriptor.clone());
        state.stats.textures_created += 1;

        Ok(texture)
    }

    fn create_semaphore(&self) -> Result<GpuSemaphore, GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }

        let semaphore = GpuSemaphore::from_raw(Self::allocate_id(&mut state));
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy(&self, resource: GpuResource) {
        let mut state = self.state.lock();
        log::trace!("DummyDevice: destroying {resource}");

        let freed = match resource {
            GpuResource::Buffer(b) => state.buffers.remove(&b).map(|b| b.size),
            GpuResource::Texture(t) => state.textures.remove(&t).map(|d| d.byte_size()),
            GpuResource::Semaphore(s) => state.semaphores.remove(&s).then_some(0),
        };

        match freed {
            Some(bytes) => {
                state.stats.allocated_bytes = state.stats.allocated_bytes.saturating_sub(bytes);
                state.stats.resources_destroyed += 1;
            }
            None => log::warn!("DummyDevice: destroying unknown resource {resource}"),
        }
    }

    fn write_buffer(
        &self,
        buffer: GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(&buffer)
            .ok_or(GraphicsError::InvalidHandle("buffer"))?;

        if offset + data.len() as u64 > target.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {offset} overflows {buffer} (size {})",
                data.len(),
                target.size
            )));
        }

        write_from(target, offset, data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: GpuBuffer,
        offset: u64,
        data: &mut [u8],
    ) -> Result<(), GraphicsError> {
        let state = self.state.lock();
        let source = state
            .buffers
            .get(&buffer)
            .ok_or(GraphicsError::InvalidHandle("buffer"))?;

        if offset + data.len() as u64 > source.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "read of {} bytes at offset {offset} overflows {buffer} (size {})",
                data.len(),
                source.size
            )));
        }

        read_into(source, offset, data);
        Ok(())
    }

    fn submit(&self, submission: Submission<'_>) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }
        if submission.index <= state.last_submitted {
            return Err(GraphicsError::InvalidParameter(format!(
                "submission index {} is not greater than {}",
                submission.index, state.last_submitted
            )));
        }

        log::trace!(
            "DummyDevice: submit #{} ({} commands, {} waits, {} signals)",
            submission.index,
            submission.commands.len(),
            submission.wait_semaphores.len(),
            submission.signal_semaphores.len()
        );

        Self::execute_copies(&mut state, &submission.commands);

        state.last_submitted = submission.index;
        state.stats.submissions += 1;
        if self.auto_complete {
            state.completed = submission.index;
        }
        state.submissions.push((submission.index, submission.commands));

        Ok(())
    }

    fn completed_submit_index(&self) -> u64 {
        self.state.lock().completed
    }

    fn wait_for_submit(&self, index: u64) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }
        if index > state.last_submitted {
            return Err(GraphicsError::InvalidParameter(format!(
                "cannot wait for submission {index}, last submitted is {}",
                state.last_submitted
            )));
        }

        // Waiting is what lets the simulated GPU make progress.
        state.completed = state.completed.max(index);
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.lost {
            return Err(GraphicsError::DeviceLost);
        }
        state.completed = state.last_submitted;
        Ok(())
    }
}
