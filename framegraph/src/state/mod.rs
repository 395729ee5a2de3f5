//! Resource state tracking.
//!
//! The [`ResourceStateTracker`] remembers the last known pipeline stage and
//! access state of every live texture and buffer the frame graph touches.
//! Each requested transition returns the previous and requested states so the
//! caller can decide whether a barrier is needed ([`Transition::needs_barrier`])
//! and batch it ([`BarrierBatch`]).
//!
//! The tracker is frame-local. Transient textures start every frame in
//! [`ResourceState::Undefined`]; stable resources carry their state across
//! frames through the transient pool.

mod barriers;
mod usage;

pub use barriers::{BarrierBatch, ResourceBarrier};
pub use usage::{PassKind, ResourceUsage};

use std::collections::HashMap;
use std::fmt;

use crate::backend::{GpuBuffer, GpuTexture};
use crate::error::GraphicsError;

/// Coarse pipeline stage a resource was last accessed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PipelineStage {
    #[default]
    TopOfPipe,
    Graphics,
    Compute,
    RayTracing,
    Transfer,
    Host,
    BottomOfPipe,
}

/// Access state (image layout plus access kind) of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Contents are undefined; transitioning out of it discards them.
    #[default]
    Undefined,
    General,
    RenderTarget,
    DepthStencilRead,
    DepthStencilWrite,
    ShaderRead,
    StorageRead,
    StorageWrite,
    Uniform,
    VertexRead,
    IndexRead,
    IndirectRead,
    TransferSource,
    TransferDestination,
    HostRead,
    Present,
}

impl ResourceState {
    /// Check if the state is a write access.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::RenderTarget
                | Self::DepthStencilWrite
                | Self::StorageWrite
                | Self::TransferDestination
        )
    }
}

/// Whether a tracked resource is a texture or a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Texture,
    Buffer,
}

/// A device resource known to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedResource {
    Texture(GpuTexture),
    Buffer(GpuBuffer),
}

impl TrackedResource {
    pub fn kind(self) -> ResourceKind {
        match self {
            Self::Texture(_) => ResourceKind::Texture,
            Self::Buffer(_) => ResourceKind::Buffer,
        }
    }
}

impl From<GpuTexture> for TrackedResource {
    fn from(texture: GpuTexture) -> Self {
        Self::Texture(texture)
    }
}

impl From<GpuBuffer> for TrackedResource {
    fn from(buffer: GpuBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Texture(t) => t.fmt(f),
            Self::Buffer(b) => b.fmt(f),
        }
    }
}

/// Stage and state of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TrackedState {
    pub stage: PipelineStage,
    pub state: ResourceState,
}

/// Result of [`ResourceStateTracker::add_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transition {
    pub previous_state: ResourceState,
    pub requested_state: ResourceState,
    pub previous_stage: PipelineStage,
    pub requested_stage: PipelineStage,
}

impl Transition {
    /// Whether the transition has to be synchronized.
    ///
    /// Textures need a barrier whenever the state changes (a layout change)
    /// or the new access writes. Buffers have no layouts, so only hazards
    /// involving a write matter and consecutive reads merge.
    pub fn needs_barrier(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Texture => {
                self.previous_state != self.requested_state || self.requested_state.is_write()
            }
            ResourceKind::Buffer => {
                self.previous_state.is_write() || self.requested_state.is_write()
            }
        }
    }
}

/// Per-resource state machine.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<TrackedResource, TrackedState>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource. Tracking an already known resource
    /// overwrites its state.
    pub fn add_tracking(
        &mut self,
        resource: impl Into<TrackedResource>,
        stage: PipelineStage,
        state: ResourceState,
    ) {
        let resource = resource.into();
        log::trace!("Tracking {resource} as {state:?} at {stage:?}");
        self.states.insert(resource, TrackedState { stage, state });
    }

    /// Move a resource to a new state, returning where it came from.
    pub fn add_transition(
        &mut self,
        resource: impl Into<TrackedResource>,
        stage: PipelineStage,
        state: ResourceState,
    ) -> Result<Transition, GraphicsError> {
        let resource = resource.into();
        let tracked = self
            .states
            .get_mut(&resource)
            .ok_or(GraphicsError::NotTracked(resource))?;

        let transition = Transition {
            previous_state: tracked.state,
            requested_state: state,
            previous_stage: tracked.stage,
            requested_stage: stage,
        };

        tracked.stage = stage;
        tracked.state = state;

        Ok(transition)
    }

    /// Stop tracking a resource, returning its last state.
    pub fn remove_tracking(&mut self, resource: impl Into<TrackedResource>) -> Option<TrackedState> {
        self.states.remove(&resource.into())
    }

    /// Current state of a resource without changing it.
    pub fn try_get_state(&self, resource: impl Into<TrackedResource>) -> Option<TrackedState> {
        self.states.get(&resource.into()).copied()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Forget every resource.
    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_transition_reports_previous_state() {
        let mut tracker = ResourceStateTracker::new();
        let texture = GpuTexture::from_raw(1);

        tracker.add_tracking(texture, PipelineStage::TopOfPipe, ResourceState::Undefined);

        let t = tracker
            .add_transition(texture, PipelineStage::Compute, ResourceState::StorageWrite)
            .unwrap();
        assert_eq!(t.previous_state, ResourceState::Undefined);
        assert_eq!(t.previous_stage, PipelineStage::TopOfPipe);

        let t = tracker
            .add_transition(texture, PipelineStage::Graphics, ResourceState::ShaderRead)
            .unwrap();
        assert_eq!(t.previous_state, ResourceState::StorageWrite);
        assert_eq!(t.previous_stage, PipelineStage::Compute);
        assert_eq!(t.requested_state, ResourceState::ShaderRead);
        assert_eq!(t.requested_stage, PipelineStage::Graphics);
        assert!(t.needs_barrier(ResourceKind::Texture));
    }

    #[test]
    fn test_untracked_resource_fails() {
        let mut tracker = ResourceStateTracker::new();
        let buffer = GpuBuffer::from_raw(9);
        assert_eq!(
            tracker.add_transition(buffer, PipelineStage::Compute, ResourceState::StorageRead),
            Err(GraphicsError::NotTracked(TrackedResource::Buffer(buffer)))
        );
    }

    #[test]
    fn test_try_get_state_does_not_mutate() {
        let mut tracker = ResourceStateTracker::new();
        let buffer = GpuBuffer::from_raw(2);
        tracker.add_tracking(buffer, PipelineStage::Transfer, ResourceState::TransferDestination);

        let expected = TrackedState {
            stage: PipelineStage::Transfer,
            state: ResourceState::TransferDestination,
        };
        assert_eq!(tracker.try_get_state(buffer), Some(expected));
        assert_eq!(tracker.try_get_state(buffer), Some(expected));

        assert_eq!(tracker.remove_tracking(buffer), Some(expected));
        assert_eq!(tracker.try_get_state(buffer), None);
    }

    #[test]
    fn test_retracking_overwrites() {
        let mut tracker = ResourceStateTracker::new();
        let texture = GpuTexture::from_raw(5);
        tracker.add_tracking(texture, PipelineStage::Graphics, ResourceState::RenderTarget);
        tracker.add_tracking(texture, PipelineStage::TopOfPipe, ResourceState::Undefined);
        assert_eq!(tracker.len(), 1);
        assert_eq!(
            tracker.try_get_state(texture).map(|s| s.state),
            Some(ResourceState::Undefined)
        );

        tracker.clear();
        assert!(tracker.is_empty());
    }

    #[rstest]
    #[case(ResourceState::ShaderRead, ResourceState::ShaderRead, false)]
    #[case(ResourceState::ShaderRead, ResourceState::StorageRead, true)]
    #[case(ResourceState::StorageWrite, ResourceState::StorageWrite, true)]
    #[case(ResourceState::Undefined, ResourceState::RenderTarget, true)]
    fn test_texture_barrier_rule(
        #[case] from: ResourceState,
        #[case] to: ResourceState,
        #[case] expected: bool,
    ) {
        let t = Transition {
            previous_state: from,
            requested_state: to,
            previous_stage: PipelineStage::Graphics,
            requested_stage: PipelineStage::Graphics,
        };
        assert_eq!(t.needs_barrier(ResourceKind::Texture), expected);
    }

    #[rstest]
    #[case(ResourceState::VertexRead, ResourceState::StorageRead, false)]
    #[case(ResourceState::IndirectRead, ResourceState::IndirectRead, false)]
    #[case(ResourceState::StorageWrite, ResourceState::IndirectRead, true)]
    #[case(ResourceState::StorageRead, ResourceState::TransferDestination, true)]
    fn test_buffer_barrier_rule(
        #[case] from: ResourceState,
        #[case] to: ResourceState,
        #[case] expected: bool,
    ) {
        let t = Transition {
            previous_state: from,
            requested_state: to,
            previous_stage: PipelineStage::Compute,
            requested_stage: PipelineStage::Graphics,
        };
        assert_eq!(t.needs_barrier(ResourceKind::Buffer), expected);
    }
}
