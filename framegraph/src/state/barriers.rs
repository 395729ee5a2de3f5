//! Barrier batching.
//!
//! Transitions for every resource a node touches are collected into one
//! [`BarrierBatch`], which is recorded as a single
//! [`GpuCommand::PipelineBarrier`](crate::backend::GpuCommand::PipelineBarrier)
//! before the node's own commands.

use super::{PipelineStage, TrackedResource, Transition};

/// One resource transition inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    pub resource: TrackedResource,
    pub transition: Transition,
}

/// Transitions recorded together, at most one per resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    barriers: Vec<ResourceBarrier>,
}

impl BarrierBatch {
    /// Create a new empty barrier batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transition if it requires synchronization.
    ///
    /// A second transition for the same resource is folded into the first:
    /// the batch keeps the earliest previous state and the latest requested
    /// one. Returns whether the batch holds a barrier for the resource
    /// afterwards.
    pub fn add(&mut self, resource: TrackedResource, transition: Transition) -> bool {
        if let Some(existing) = self.barriers.iter_mut().find(|b| b.resource == resource) {
            existing.transition.requested_state = transition.requested_state;
            existing.transition.requested_stage = transition.requested_stage;
            return true;
        }

        if !transition.needs_barrier(resource.kind()) {
            return false;
        }

        self.barriers.push(ResourceBarrier {
            resource,
            transition,
        });
        true
    }

    /// Check if the batch has any barriers.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    /// Get the number of barriers in the batch.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceBarrier> + '_ {
        self.barriers.iter()
    }

    /// Barrier recorded for `resource`, if any.
    pub fn find(&self, resource: TrackedResource) -> Option<&Transition> {
        self.barriers
            .iter()
            .find(|b| b.resource == resource)
            .map(|b| &b.transition)
    }

    /// Every source stage the batch waits on.
    pub fn src_stages(&self) -> Vec<PipelineStage> {
        let mut stages: Vec<_> = self
            .barriers
            .iter()
            .map(|b| b.transition.previous_stage)
            .collect();
        stages.sort();
        stages.dedup();
        stages
    }

    /// Clear all barriers from the batch.
    pub fn clear(&mut self) {
        self.barriers.clear();
    }
}
