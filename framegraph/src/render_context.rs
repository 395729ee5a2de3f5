//! Per-device frame state shared by the graph and its owner.

use std::sync::Arc;

use crate::backend::{CommandList, GpuDevice};
use crate::config::FrameGraphConfig;
use crate::error::GraphicsError;
use crate::staging::StagingRing;
use crate::submission::SubmissionContext;

/// Device, submission tracking and the upload ring.
///
/// One frame is `begin_frame`, then [`FrameGraph::build`] and
/// [`FrameGraph::execute`], then `end_frame`:
///
/// ```ignore
/// let index = render.begin_frame()?;
/// graph.build(&mut render, &services)?;
/// let mut commands = CommandList::new();
/// graph.execute(&mut render, &services, &mut commands)?;
/// render.end_frame(commands)?;
/// ```
///
/// [`FrameGraph::build`]: crate::graph::FrameGraph::build
/// [`FrameGraph::execute`]: crate::graph::FrameGraph::execute
pub struct RenderContext {
    pub device: Arc<dyn GpuDevice>,
    pub submission: SubmissionContext,
    pub staging: StagingRing,
}

impl RenderContext {
    pub fn new(device: Arc<dyn GpuDevice>, config: &FrameGraphConfig) -> Result<Self, GraphicsError> {
        log::info!("RenderContext: creating on '{}' device", device.name());

        let submission = SubmissionContext::new(device.clone(), config.submission);
        let staging = StagingRing::with_label(device.clone(), config.staging, "upload_ring")?;

        Ok(Self {
            device,
            submission,
            staging,
        })
    }

    /// Start recording a submission. Returns its index.
    pub fn begin_frame(&mut self) -> Result<u64, GraphicsError> {
        let index = self.submission.submit_begin()?;
        self.staging
            .notify_finished_frames(self.submission.get_last_finished_submit());
        self.staging.begin_frame(index);
        Ok(index)
    }

    /// Submit `commands` and close the frame.
    pub fn end_frame(&mut self, commands: CommandList) -> Result<(), GraphicsError> {
        self.staging.end_frame();
        let result = self.submission.submit_end(commands, &[], &[]);
        redlilium_core::frame_mark!();
        result
    }

    /// Wait for the device and release everything.
    pub fn shutdown(mut self) -> Result<(), GraphicsError> {
        log::info!("RenderContext: shutting down");
        self.staging.shutdown(&mut self.submission);
        self.submission.shutdown()
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("device", &self.device.name())
            .field("submission", &self.submission)
            .field("staging", &self.staging)
            .finish()
    }
}
