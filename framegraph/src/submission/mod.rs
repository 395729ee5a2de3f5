//! Submission context.
//!
//! GPU work runs asynchronously: the host keeps recording while the GPU is
//! one or more submissions behind. Every submission gets an index from a
//! monotonically increasing counter, and the device reports the highest index
//! it has finished. Everything that must outlive GPU work is keyed off these
//! two numbers:
//!
//! ```text
//!   submit_begin() ─► index N being recorded
//!        │               destroy_deferred(res, N) queues res
//!   submit_end()   ─► N submitted, counter moves to N + 1
//!        │
//!   ... later ...
//!   submit_begin() ─► polls device: last finished = M
//!                     every queued resource with index <= M is destroyed
//! ```
//!
//! Index `0` is never used for a submission; `get_last_finished_submit() == 0`
//! means nothing has finished yet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::{CommandList, GpuDevice, GpuResource, GpuSemaphore, Submission};
use crate::config::SubmissionConfig;
use crate::error::GraphicsError;

/// Thread-safe view of the last finished submission index.
///
/// Cloning shares the same counter; it can be polled from any thread.
#[derive(Debug, Clone, Default)]
pub struct SubmitCompletion {
    last_finished: Arc<AtomicU64>,
}

impl SubmitCompletion {
    /// Highest submission index known to be complete.
    pub fn last_finished(&self) -> u64 {
        self.last_finished.load(Ordering::Acquire)
    }

    /// Whether the submission with `index` is complete.
    pub fn is_done(&self, index: u64) -> bool {
        index <= self.last_finished()
    }

    fn advance(&self, index: u64) {
        self.last_finished.fetch_max(index, Ordering::AcqRel);
    }
}

/// A resource waiting for a submission to complete.
#[derive(Debug, Clone, Copy)]
struct PendingDestruction {
    resource: GpuResource,
    submit_index: u64,
}

/// Owns the submission counter and the deferred destruction queue.
pub struct SubmissionContext {
    device: Arc<dyn GpuDevice>,
    config: SubmissionConfig,
    /// Index of the submission currently being recorded.
    submit_index: u64,
    completion: SubmitCompletion,
    /// Ordered by submit index, oldest first.
    pending: VecDeque<PendingDestruction>,
    recording: bool,
}

impl SubmissionContext {
    pub fn new(device: Arc<dyn GpuDevice>, config: SubmissionConfig) -> Self {
        log::info!(
            "SubmissionContext: created on {} (max {} submissions in flight)",
            device.name(),
            config.max_submits_in_flight
        );

        Self {
            device,
            config,
            submit_index: 1,
            completion: SubmitCompletion::default(),
            pending: VecDeque::new(),
            recording: false,
        }
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    /// Start recording a submission.
    ///
    /// Polls completion, waits for the oldest submission if too many are in
    /// flight, and destroys every deferred resource whose submission is done.
    /// Returns the index of the submission being recorded.
    pub fn submit_begin(&mut self) -> Result<u64, GraphicsError> {
        redlilium_core::profile_scope!("submit_begin");

        if self.recording {
            log::warn!(
                "SubmissionContext: submit_begin called twice for submission {}",
                self.submit_index
            );
        }

        let mut last_finished = self.poll_completion();

        let max_in_flight = self.config.max_submits_in_flight.max(1);
        let in_flight = self.submit_index - 1 - last_finished;
        if in_flight >= max_in_flight {
            let wait_for = self.submit_index - max_in_flight;
            log::trace!(
                "SubmissionContext: {in_flight} submissions in flight, waiting for {wait_for}"
            );
            self.wait_for_submit_completion(wait_for)?;
            last_finished = self.get_last_finished_submit();
        }

        self.destroy_resources_until(last_finished);
        self.recording = true;

        Ok(self.submit_index)
    }

    /// Submit the recorded commands and advance the counter.
    pub fn submit_end(
        &mut self,
        commands: CommandList,
        wait_semaphores: &[GpuSemaphore],
        signal_semaphores: &[GpuSemaphore],
    ) -> Result<(), GraphicsError> {
        redlilium_core::profile_scope!("submit_end");

        let index = self.submit_index;
        log::trace!(
            "SubmissionContext: submitting #{index} ({} commands)",
            commands.len()
        );

        self.device.submit(Submission {
            index,
            commands,
            wait_semaphores,
            signal_semaphores,
        })?;

        self.submit_index += 1;
        self.recording = false;
        Ok(())
    }

    /// Index of the submission currently being recorded.
    pub fn get_submit_index(&self) -> u64 {
        self.submit_index
    }

    /// Highest submission index observed as complete.
    pub fn get_last_finished_submit(&self) -> u64 {
        self.completion.last_finished()
    }

    pub fn is_submit_done(&self, index: u64) -> bool {
        self.completion.is_done(index)
    }

    /// Ask the device how far it got and publish the result.
    pub fn poll_completion(&mut self) -> u64 {
        let completed = self.device.completed_submit_index();
        self.completion.advance(completed);
        self.completion.last_finished()
    }

    /// Shared completion counter.
    pub fn completion(&self) -> SubmitCompletion {
        self.completion.clone()
    }

    /// Block until submission `index` completes.
    pub fn wait_for_submit_completion(&mut self, index: u64) -> Result<(), GraphicsError> {
        redlilium_core::profile_scope!("wait_for_submit_completion");

        if self.is_submit_done(index) {
            return Ok(());
        }

        if index >= self.submit_index {
            return Err(GraphicsError::InvalidParameter(format!(
                "submission {index} has not been submitted yet (next is {})",
                self.submit_index
            )));
        }

        self.device.wait_for_submit(index)?;
        self.completion.advance(index);
        self.poll_completion();
        Ok(())
    }

    /// Destroy `resource` once submission `submit_index` has completed.
    pub fn destroy_deferred(&mut self, resource: impl Into<GpuResource>, submit_index: u64) {
        let resource = resource.into();
        log::trace!("SubmissionContext: {resource} deferred until submission {submit_index}");

        let entry = PendingDestruction {
            resource,
            submit_index,
        };

        // Callers almost always pass the current index, so insertion is at the back.
        let position = self
            .pending
            .iter()
            .rposition(|p| p.submit_index <= submit_index)
            .map_or(0, |i| i + 1);
        self.pending.insert(position, entry);
    }

    /// Destroy every queued resource whose submission index is at most
    /// `last_finished`. Returns how many were destroyed.
    pub fn destroy_resources_until(&mut self, last_finished: u64) -> usize {
        let mut destroyed = 0;
        while let Some(front) = self.pending.front() {
            if front.submit_index > last_finished {
                break;
            }
            if let Some(entry) = self.pending.pop_front() {
                self.device.destroy(entry.resource);
                destroyed += 1;
            }
        }

        if destroyed > 0 {
            log::trace!(
                "SubmissionContext: destroyed {destroyed} resources (finished up to {last_finished})"
            );
        }
        destroyed
    }

    pub fn pending_destruction_count(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the GPU to go idle and destroy everything still queued.
    pub fn shutdown(&mut self) -> Result<(), GraphicsError> {
        log::info!(
            "SubmissionContext: shutting down ({} resources pending)",
            self.pending.len()
        );

        self.device.wait_idle()?;
        self.completion.advance(self.submit_index - 1);
        self.destroy_resources_until(u64::MAX);
        Ok(())
    }
}

impl std::fmt::Debug for SubmissionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionContext")
            .field("device", &self.device.name())
            .field("submit_index", &self.submit_index)
            .field("last_finished", &self.get_last_finished_submit())
            .field("pending", &self.pending.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(SubmitCompletion: Send, Sync);
