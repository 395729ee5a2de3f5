//! Configuration for the frame graph and the systems it drives.
//!
//! All structs have sensible defaults and `with_*` builders:
//!
//! ```
//! use redlilium_framegraph::config::{FrameGraphConfig, StagingConfig};
//!
//! let config = FrameGraphConfig::default()
//!     .with_staging(StagingConfig::default().with_size(4 << 20));
//! assert_eq!(config.staging.size, 4 << 20);
//! ```

/// Submission context configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionConfig {
    /// How many submissions may be pending on the GPU before
    /// [`submit_begin`](crate::submission::SubmissionContext::submit_begin) blocks.
    pub max_submits_in_flight: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_submits_in_flight: 2,
        }
    }
}

impl SubmissionConfig {
    pub fn with_max_submits_in_flight(mut self, count: u64) -> Self {
        self.max_submits_in_flight = count.max(1);
        self
    }
}

/// Staging ring configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingConfig {
    /// Ring size in bytes.
    pub size: u64,
    /// Alignment of every staged allocation.
    pub alignment: u64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            size: 16 << 20,
            alignment: 16,
        }
    }
}

impl StagingConfig {
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }
}

/// Transient pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on backing slots per kind per frame. `None` means unbounded.
    pub max_transient_slots: Option<usize>,
    /// Frames an unused backing stays around before it is destroyed.
    pub max_idle_frames: u64,
    /// Frames a stable resource may go unrequested before it is released.
    pub stable_frames_before_release: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_transient_slots: None,
            max_idle_frames: 3,
            stable_frames_before_release: 1,
        }
    }
}

impl PoolConfig {
    pub fn with_max_transient_slots(mut self, slots: usize) -> Self {
        self.max_transient_slots = Some(slots);
        self
    }

    pub fn with_max_idle_frames(mut self, frames: u64) -> Self {
        self.max_idle_frames = frames;
        self
    }

    pub fn with_stable_frames_before_release(mut self, frames: u64) -> Self {
        self.stable_frames_before_release = frames;
        self
    }
}

/// Draw registry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRegistryConfig {
    /// Size in bytes of the shared vertex buffer.
    pub vertex_table_size: u64,
    /// Size in bytes of the shared index buffer.
    pub index_table_size: u64,
}

impl Default for DrawRegistryConfig {
    fn default() -> Self {
        Self {
            vertex_table_size: 64 << 20,
            index_table_size: 16 << 20,
        }
    }
}

impl DrawRegistryConfig {
    pub fn with_vertex_table_size(mut self, size: u64) -> Self {
        self.vertex_table_size = size;
        self
    }

    pub fn with_index_table_size(mut self, size: u64) -> Self {
        self.index_table_size = size;
        self
    }
}

/// Everything a [`FrameGraph`](crate::graph::FrameGraph) needs to create its
/// collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameGraphConfig {
    pub submission: SubmissionConfig,
    pub staging: StagingConfig,
    /// Ring used for buffer downloads requested by nodes.
    pub download: StagingConfig,
    pub pool: PoolConfig,
    pub draw: DrawRegistryConfig,
}

impl FrameGraphConfig {
    pub fn with_submission(mut self, submission: SubmissionConfig) -> Self {
        self.submission = submission;
        self
    }

    pub fn with_staging(mut self, staging: StagingConfig) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_download(mut self, download: StagingConfig) -> Self {
        self.download = download;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_draw(mut self, draw: DrawRegistryConfig) -> Self {
        self.draw = draw;
        self
    }
}
