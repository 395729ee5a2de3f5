//! Staging ring for host/device transfers.
//!
//! A single host-visible buffer is treated as a ring. Uploads are written into
//! the ring on the host and copied into device buffers by recorded
//! [`GpuCommand::CopyBuffer`] commands; downloads go the other way. All bytes
//! staged between [`begin_frame`](StagingRing::begin_frame) and
//! [`end_frame`](StagingRing::end_frame) belong to that frame's submission and
//! return to the ring once
//! [`notify_finished_frames`](StagingRing::notify_finished_frames) reports
//! the submission as complete.
//!
//! ```text
//!          first_used              first_unused
//!              │                        │
//!   ┌──────────▼────────────────────────▼─────────────┐
//!   │  free    │ frame N │ frame N+1 │ pending │ free │
//!   └─────────────────────────────────────────────────┘
//! ```

mod ring;

pub use ring::{RingTracker, Segment, SegmentedSpan};

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::{BufferCopyRegion, CommandList, GpuBuffer, GpuCommand, GpuDevice};
use crate::config::StagingConfig;
use crate::error::GraphicsError;
use crate::submission::SubmissionContext;
use crate::types::{BufferDescriptor, BufferUsage, align_up};

/// A staged allocation inside the ring.
pub type StagingSpan = SegmentedSpan;

/// Bytes owned by one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SubmittedRange {
    submit_index: u64,
    size: u64,
}

/// Host-visible staging ring.
pub struct StagingRing {
    device: Arc<dyn GpuDevice>,
    buffer: GpuBuffer,
    ring: RingTracker,
    alignment: u64,
    /// Submission the current frame's bytes belong to.
    current_submit: Option<u64>,
    /// Bytes fetched since `begin_frame`.
    pending_bytes: u64,
    submitted: VecDeque<SubmittedRange>,
    label: String,
}

impl StagingRing {
    /// Create a ring of `config.size` bytes.
    pub fn new(device: Arc<dyn GpuDevice>, config: StagingConfig) -> Result<Self, GraphicsError> {
        Self::with_label(device, config, "staging_ring")
    }

    pub fn with_label(
        device: Arc<dyn GpuDevice>,
        config: StagingConfig,
        label: &str,
    ) -> Result<Self, GraphicsError> {
        if config.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "staging ring size must be greater than 0".into(),
            ));
        }
        if !config.alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "staging alignment {} is not a power of two",
                config.alignment
            )));
        }

        let capacity = align_up(config.size, config.alignment);
        let buffer = device.create_buffer(
            &BufferDescriptor::new(
                capacity,
                BufferUsage::HOST_VISIBLE
                    | BufferUsage::COPY_SRC
                    | BufferUsage::COPY_DST
                    | BufferUsage::STORAGE,
            )
            .with_label(label),
        )?;

        log::info!("StagingRing '{label}': created {buffer} ({capacity} bytes)");

        Ok(Self {
            device,
            buffer,
            ring: RingTracker::new(capacity),
            alignment: config.alignment,
            current_submit: None,
            pending_bytes: 0,
            submitted: VecDeque::new(),
            label: label.to_owned(),
        })
    }

    /// The backing host-visible buffer.
    pub fn buffer(&self) -> GpuBuffer {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    pub fn available_bytes(&self) -> u64 {
        self.ring.available_count()
    }

    pub fn used_bytes(&self) -> u64 {
        self.ring.used_count()
    }

    /// Bytes staged since `begin_frame`.
    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes
    }

    /// Start attributing staged bytes to submission `submit_index`.
    pub fn begin_frame(&mut self, submit_index: u64) {
        if let Some(current) = self.current_submit {
            log::warn!(
                "StagingRing '{}': begin_frame({submit_index}) while frame {current} is open",
                self.label
            );
        }
        self.current_submit = Some(submit_index);
    }

    /// Close the current frame; its bytes are held until its submission completes.
    pub fn end_frame(&mut self) {
        let Some(submit_index) = self.current_submit.take() else {
            log::warn!("StagingRing '{}': end_frame without begin_frame", self.label);
            return;
        };

        if self.pending_bytes != 0 {
            log::debug!(
                "StagingRing '{}': {} bytes staged for submission {submit_index}",
                self.label,
                self.pending_bytes
            );
            self.submitted.push_back(SubmittedRange {
                submit_index,
                size: self.pending_bytes,
            });
        }

        debug_assert_eq!(
            self.ring.used_count(),
            self.submitted.iter().map(|r| r.size).sum::<u64>()
        );

        self.pending_bytes = 0;
    }

    /// Release every frame whose submission index is at most `last_finished`.
    pub fn notify_finished_frames(&mut self, last_finished: u64) {
        while let Some(front) = self.submitted.front() {
            if front.submit_index > last_finished {
                break;
            }
            self.ring.release(front.size);
            self.submitted.pop_front();
        }
    }

    fn fetch(&mut self, size: u64) -> Result<StagingSpan, GraphicsError> {
        let span = self
            .ring
            .fetch(size)
            .ok_or(GraphicsError::StagingExhausted {
                requested: size,
                available: self.ring.available_count(),
            })?;
        self.pending_bytes += size;
        Ok(span)
    }

    /// Reserve `size` bytes, possibly split across the end of the ring.
    pub fn stage_allocate(&mut self, size: u64) -> Result<StagingSpan, GraphicsError> {
        if self.current_submit.is_none() {
            log::warn!("StagingRing '{}': staging outside of a frame", self.label);
        }

        let reserved = align_up(size, self.alignment);
        if !self.ring.has_available(reserved) {
            return Err(GraphicsError::StagingExhausted {
                requested: size,
                available: self.ring.available_count(),
            });
        }

        let span = self.fetch(reserved)?;
        Ok(span.truncate(size))
    }

    /// Reserve `size` contiguous bytes starting at a multiple of `alignment`.
    ///
    /// If the run up to the end of the ring is too short, it is skipped and the
    /// allocation starts at offset 0.
    pub fn stage_allocate_contiguous_aligned(
        &mut self,
        size: u64,
        alignment: u64,
    ) -> Result<StagingSpan, GraphicsError> {
        let alignment = alignment.max(self.alignment);
        if !alignment.is_power_of_two() {
            return Err(GraphicsError::InvalidParameter(format!(
                "alignment {alignment} is not a power of two"
            )));
        }

        let reserved = align_up(size, self.alignment);
        let available = self.ring.available_count();
        let exhausted = GraphicsError::StagingExhausted {
            requested: size,
            available,
        };

        if available < reserved {
            return Err(exhausted);
        }

        let first_unused = self.ring.first_unused();
        let padding = align_up(first_unused, alignment) - first_unused;
        let first_segment = self.ring.first_segment_available_count();

        if first_segment >= padding + reserved {
            if padding > 0 {
                self.fetch(padding)?;
            }
        } else if available - first_segment >= reserved {
            self.fetch(first_segment)?;
            debug_assert_eq!(self.ring.first_unused(), 0);
        } else {
            return Err(exhausted);
        }

        let span = self.fetch(reserved)?;
        debug_assert!(span.is_contiguous());
        Ok(span.truncate(size))
    }

    /// Stage a copy of `data`.
    pub fn stage(&mut self, data: &[u8]) -> Result<StagingSpan, GraphicsError> {
        let span = self.stage_allocate(data.len() as u64)?;
        self.copy_to(span, 0, data)?;
        Ok(span)
    }

    /// Write `data` into `span`, skipping its first `offset` bytes.
    pub fn copy_to(&self, span: StagingSpan, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let target = span.subspan(offset);
        if (data.len() as u64) > target.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "copying {} bytes into a staging span of {} bytes",
                data.len(),
                target.size()
            )));
        }

        let mut written = 0usize;
        for segment in target.iter() {
            if written == data.len() {
                break;
            }
            let count = (segment.len() as usize).min(data.len() - written);
            self.device
                .write_buffer(self.buffer, segment.begin, &data[written..written + count])?;
            written += count;
        }

        Ok(())
    }

    /// Read from `span`, skipping its first `offset` bytes, into `out`.
    pub fn copy_from(&self, out: &mut [u8], span: StagingSpan, offset: u64) -> Result<(), GraphicsError> {
        let source = span.subspan(offset);
        if (out.len() as u64) > source.size() {
            return Err(GraphicsError::InvalidParameter(format!(
                "reading {} bytes from a staging span of {} bytes",
                out.len(),
                source.size()
            )));
        }

        let mut read = 0usize;
        for segment in source.iter() {
            if read == out.len() {
                break;
            }
            let count = (segment.len() as usize).min(out.len() - read);
            self.device
                .read_buffer(self.buffer, segment.begin, &mut out[read..read + count])?;
            read += count;
        }

        Ok(())
    }

    /// Record a copy from `span` into `buffer` at `buffer_offset`.
    pub fn upload(
        &self,
        commands: &mut CommandList,
        span: StagingSpan,
        buffer: GpuBuffer,
        buffer_offset: u64,
    ) {
        debug_assert!(span.size() > 0, "uploading an empty span");

        let mut regions = Vec::with_capacity(2);
        let mut offset = 0;
        for segment in span.iter() {
            regions.push(BufferCopyRegion {
                src_offset: segment.begin,
                dst_offset: buffer_offset + offset,
                size: segment.len(),
            });
            offset += segment.len();
        }

        commands.push(GpuCommand::CopyBuffer {
            src: self.buffer,
            dst: buffer,
            regions,
        });
    }

    /// Record a copy from `buffer` at `buffer_offset` into `span`.
    pub fn download(
        &self,
        commands: &mut CommandList,
        buffer: GpuBuffer,
        buffer_offset: u64,
        span: StagingSpan,
    ) {
        debug_assert!(span.size() > 0, "downloading into an empty span");

        let mut regions = Vec::with_capacity(2);
        let mut offset = 0;
        for segment in span.iter() {
            regions.push(BufferCopyRegion {
                src_offset: buffer_offset + offset,
                dst_offset: segment.begin,
                size: segment.len(),
            });
            offset += segment.len();
        }

        commands.push(GpuCommand::CopyBuffer {
            src: buffer,
            dst: self.buffer,
            regions,
        });
    }

    /// Queue the ring buffer for destruction after the current submission.
    pub fn shutdown(self, submission: &mut SubmissionContext) {
        log::info!("StagingRing '{}': shutting down", self.label);
        submission.destroy_deferred(self.buffer, submission.get_submit_index());
    }
}

impl std::fmt::Debug for StagingRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingRing")
            .field("label", &self.label)
            .field("buffer", &self.buffer)
            .field("capacity", &self.ring.capacity())
            .field("used", &self.ring.used_count())
            .field("pending_bytes", &self.pending_bytes)
            .finish()
    }
}
