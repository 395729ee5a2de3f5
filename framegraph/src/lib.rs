//! # RedLilium Frame Graph
//!
//! Per-frame GPU work scheduling for the RedLilium renderer.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`FrameGraph`] - Subgraphs of nodes wired by typed pins, built and executed every frame
//! - [`TransientPool`] - Lifetime-based aliasing of per-frame textures and buffers
//! - [`ResourceStateTracker`] - Barrier generation from declared resource usages
//! - [`SubmissionContext`] - Submission indices, backpressure and deferred destruction
//! - [`StagingRing`] - Host-visible ring for uploads and downloads
//! - [`DrawRegistry`] - Resident meshes and per-frame instance tables
//! - [`DummyDevice`] - In-memory [`GpuDevice`] for tests and headless runs
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_framegraph::{FrameGraph, NodeRegistry, RenderContext, ServiceRegistry};
//!
//! let mut render = RenderContext::new(device.clone(), &config)?;
//! let mut graph = FrameGraph::new(registry, device, &config)?;
//! let main = graph.instantiate(&template)?;
//!
//! render.begin_frame()?;
//! graph.build(&mut render, &services)?;
//! let mut commands = CommandList::new();
//! graph.execute(&mut render, &services, &mut commands)?;
//! render.end_frame(commands)?;
//! ```

pub mod backend;
pub mod config;
pub mod draw;
pub mod error;
pub mod graph;
pub mod pool;
pub mod render_context;
pub mod services;
pub mod staging;
pub mod state;
pub mod submission;
pub mod types;

// Re-export main types for convenience
pub use backend::{CommandList, DummyDevice, GpuCommand, GpuDevice};
pub use config::{
    DrawRegistryConfig, FrameGraphConfig, PoolConfig, StagingConfig, SubmissionConfig,
};
pub use draw::{DrawMeshId, DrawRegistry, InstanceBufferId, InstanceRecord, MeshData, MeshProvider};
pub use error::GraphicsError;
pub use graph::{
    BufferPin, BuildContext, DataPin, DataSinkPin, ExecuteContext, FrameGraph, FrameGraphNode,
    FrameGraphTemplate, FrameStatus, GraphError, NodeRegistry, PinDeclarations, SubgraphId,
    TemplateRegistry, TexturePin,
};
pub use pool::TransientPool;
pub use render_context::RenderContext;
pub use services::ServiceRegistry;
pub use staging::StagingRing;
pub use state::{PassKind, ResourceStateTracker, ResourceUsage};
pub use submission::SubmissionContext;
pub use types::{BufferDescriptor, BufferUsage, Extent3d, TextureDescriptor, TextureFormat, TextureUsage};

/// Frame graph library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the frame graph subsystem.
///
/// This should be called once before creating any device or graph.
pub fn init() {
    log::info!("RedLilium Frame Graph v{} initialized", VERSION);
}
