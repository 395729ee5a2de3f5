//! Common utilities for frame graph integration tests.
//!
//! Test nodes, a harness owning a dummy device with its render context and
//! graph, and helpers to run whole frames.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_framegraph::backend::{CommandList, DummyDevice, GpuCommand};
use redlilium_framegraph::draw::DrawRegistry;
use redlilium_framegraph::graph::{
    BufferDownload, BufferPin, BuildContext, DataPin, DataSinkPin, ExecuteContext, FrameGraph,
    FrameGraphNode, FrameStatus, GraphError, NodeRegistry, PinDeclarations, TexturePin,
};
use redlilium_framegraph::state::{PassKind, ResourceUsage};
use redlilium_framegraph::types::{BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureUsage};
use redlilium_framegraph::{FrameGraphConfig, RenderContext, ServiceRegistry};

/// Initialise logging once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn color_target(size: u32) -> TextureDescriptor {
    TextureDescriptor::new_2d(size, size, TextureFormat::Rgba8Unorm, TextureUsage::empty())
}

// ============================================================================
// Test nodes
// ============================================================================

/// Creates a texture as a color attachment.
#[derive(Default)]
pub struct RenderTexture {
    pub out: TexturePin,
}

impl FrameGraphNode for RenderTexture {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        ctx.create_texture(self.out, color_target(64), ResourceUsage::RenderTarget)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        ctx.texture(self.out)?;
        ctx.commands().push(GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        });
        Ok(())
    }
}

/// Creates a texture written by a compute shader.
#[derive(Default)]
pub struct ComputeWrite {
    pub out: TexturePin,
}

impl FrameGraphNode for ComputeWrite {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Compute);
        ctx.create_texture(self.out, color_target(64), ResourceUsage::StorageWrite)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        ctx.commands().push(GpuCommand::Dispatch { x: 8, y: 8, z: 1 });
        Ok(())
    }
}

/// Samples its input in a graphics pass and passes it on.
#[derive(Default)]
pub struct GraphicsRead {
    pub input: TexturePin,
}

impl FrameGraphNode for GraphicsRead {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input).required();
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        ctx.acquire_texture(self.input, ResourceUsage::ShaderRead)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        ctx.commands().push(GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        });
        Ok(())
    }
}

/// Writes its input again from a compute shader.
#[derive(Default)]
pub struct ComputeRewrite {
    pub input: TexturePin,
}

impl FrameGraphNode for ComputeRewrite {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input).required();
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Compute);
        ctx.acquire_texture(self.input, ResourceUsage::StorageWrite)?;
        Ok(())
    }
}

/// Blits `input` into a new texture on `out`.
#[derive(Default)]
pub struct Blit {
    pub input: TexturePin,
    pub out: TexturePin,
}

impl FrameGraphNode for Blit {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input).required();
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        let descriptor = ctx.texture_descriptor(self.input)?;
        ctx.acquire_texture(self.input, ResourceUsage::ShaderRead)?;
        ctx.create_texture(self.out, descriptor, ResourceUsage::RenderTarget)?;
        Ok(())
    }
}

/// Uploads `values` into a storage buffer.
#[derive(Default)]
pub struct UploadValues {
    pub values: DataPin<Vec<u32>>,
    pub out: BufferPin,
}

impl FrameGraphNode for UploadValues {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("values", |n| &mut n.values);
        pins.buffer("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let values = ctx.access(self.values)?.clone();
        let size = (values.len() * 4).max(4) as u64;
        ctx.create_buffer(
            self.out,
            BufferDescriptor::new(size, BufferUsage::empty()),
            ResourceUsage::StorageRead,
            Some(bytemuck::cast_slice(&values)),
        )?;
        Ok(())
    }
}

/// Copies its input buffer back to the host.
#[derive(Default)]
pub struct Readback {
    pub input: BufferPin,
    pub result: DataPin<BufferDownload>,
}

impl FrameGraphNode for Readback {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.buffer("input", |n| &mut n.input).required();
        pins.data("result", |n| &mut n.result);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let download = ctx.download(self.input)?;
        *ctx.access_mut(self.result)? = download;
        Ok(())
    }
}

/// Adds up its input values.
#[derive(Default)]
pub struct Sum {
    pub values: DataPin<Vec<u32>>,
    pub total: DataPin<u32>,
}

impl FrameGraphNode for Sum {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("values", |n| &mut n.values);
        pins.data("total", |n| &mut n.total);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let total: u32 = ctx.access(self.values)?.iter().sum();
        *ctx.access_mut(self.total)? = total;
        Ok(())
    }
}

/// Doubles a value.
#[derive(Default)]
pub struct Double {
    pub input: DataPin<u32>,
    pub output: DataPin<u32>,
}

impl FrameGraphNode for Double {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("input", |n| &mut n.input);
        pins.data("output", |n| &mut n.output);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let value = *ctx.access(self.input)?;
        *ctx.access_mut(self.output)? = value * 2;
        Ok(())
    }
}

/// Pushes its name into a sink.
#[derive(Default)]
pub struct Contributor {
    pub items: DataSinkPin<String>,
}

impl FrameGraphNode for Contributor {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.sink("items", |n| &mut n.items);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let label = format!("node {}", ctx.node_index());
        ctx.push_sink(self.items, label)
    }
}

/// Collects everything pushed into its sink.
#[derive(Default)]
pub struct Collector {
    pub items: DataSinkPin<String>,
    pub count: DataPin<usize>,
}

impl FrameGraphNode for Collector {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.sink("items", |n| &mut n.items);
        pins.data("count", |n| &mut n.count);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let count = ctx.sink(self.items)?.len();
        *ctx.access_mut(self.count)? = count;
        Ok(())
    }
}

/// Counts the frames in which `Resize` was pushed.
#[derive(Default)]
pub struct ResizeListener {
    pub resizes: DataPin<u32>,
}

/// Event pushed by tests.
pub struct Resize;

impl FrameGraphNode for ResizeListener {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("resizes", |n| &mut n.resizes);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        if ctx.has_event::<Resize>() {
            *ctx.access_mut(self.resizes)? += 1;
        }
        Ok(())
    }
}

/// Fails its build when `fail` is set.
#[derive(Default)]
pub struct Fallible {
    pub fail: DataPin<bool>,
    pub out: TexturePin,
}

impl FrameGraphNode for Fallible {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("fail", |n| &mut n.fail);
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.create_texture(self.out, color_target(32), ResourceUsage::RenderTarget)?;
        if *ctx.access(self.fail)? {
            return Err(GraphError::node_failed("asked to fail"));
        }
        Ok(())
    }
}

/// Keeps a history texture across frames and reports its age.
#[derive(Default)]
pub struct History {
    pub history: TexturePin,
    pub age: DataPin<u32>,
}

impl FrameGraphNode for History {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("history", |n| &mut n.history);
        pins.data("age", |n| &mut n.age);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Compute);
        ctx.create_stable_texture(self.history, color_target(16), ResourceUsage::StorageWrite)?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        let age = ctx.texture_frames_alive(self.history)?;
        *ctx.access_mut(self.age)? = age;
        Ok(())
    }
}

/// Hands its input on untouched.
#[derive(Default)]
pub struct PassThrough {
    pub input: TexturePin,
    pub out: TexturePin,
}

impl FrameGraphNode for PassThrough {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input).required();
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.reroute_texture(self.input, self.out)?;
        Ok(())
    }
}

/// Samples `input` only when something is connected to it.
#[derive(Default)]
pub struct OptionalInput {
    pub input: TexturePin,
    pub out: TexturePin,
    pub built_with_source: DataPin<bool>,
    pub executed_with_source: DataPin<bool>,
}

impl FrameGraphNode for OptionalInput {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input);
        pins.texture("out", |n| &mut n.out);
        pins.data("built_with_source", |n| &mut n.built_with_source);
        pins.data("executed_with_source", |n| &mut n.executed_with_source);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        let sourced = ctx.has_source(self.input);
        if sourced {
            ctx.acquire_texture(self.input, ResourceUsage::ShaderRead)?;
        }
        ctx.create_texture(self.out, color_target(64), ResourceUsage::RenderTarget)?;
        *ctx.access_mut(self.built_with_source)? = sourced;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        let sourced = ctx.has_source(self.input);
        *ctx.access_mut(self.executed_with_source)? = sourced;
        Ok(())
    }
}

/// Creates a buffer in build and fills it with `values` while executing.
#[derive(Default)]
pub struct StreamValues {
    pub values: DataPin<Vec<u32>>,
    pub out: BufferPin,
}

impl FrameGraphNode for StreamValues {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("values", |n| &mut n.values);
        pins.buffer("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Transfer);
        let size = (ctx.access(self.values)?.len() * 4).max(4) as u64;
        ctx.create_buffer(
            self.out,
            BufferDescriptor::new(size, BufferUsage::empty()),
            ResourceUsage::TransferDestination,
            None,
        )?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        let values = ctx.access(self.values)?.clone();
        ctx.upload(self.out, bytemuck::cast_slice(&values), 0)
    }
}

/// Turns the first draw batch's instance tables into buffer pins.
#[derive(Default)]
pub struct DrawBatches {
    pub instances: BufferPin,
    pub mesh_database: BufferPin,
    pub batch_count: DataPin<usize>,
}

impl FrameGraphNode for DrawBatches {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.buffer("instances", |n| &mut n.instances);
        pins.buffer("mesh_database", |n| &mut n.mesh_database);
        pins.data("batch_count", |n| &mut n.batch_count);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        let registry = ctx
            .service::<DrawRegistry>()
            .ok_or_else(|| GraphError::node_failed("no draw registry"))?;
        let count = registry.draw_calls().len();
        let first = registry
            .draw_calls()
            .first()
            .and_then(|batch| batch.instance_buffers.first())
            .map(|buffer| buffer.span);
        let database = registry.mesh_database_data().to_vec();

        if let Some(span) = first {
            ctx.create_buffer_from_staged(self.instances, span, ResourceUsage::StorageRead)?;
        }
        ctx.create_buffer(
            self.mesh_database,
            BufferDescriptor::new(database.len().max(4) as u64, BufferUsage::empty()),
            ResourceUsage::StorageRead,
            Some(&database),
        )?;
        *ctx.access_mut(self.batch_count)? = count;
        Ok(())
    }
}

/// Register every test node.
pub fn registry() -> Arc<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    registry.register_node::<RenderTexture>();
    registry.register_node::<ComputeWrite>();
    registry.register_node::<GraphicsRead>();
    registry.register_node::<ComputeRewrite>();
    registry.register_node::<Blit>();
    registry.register_node::<UploadValues>();
    registry.register_node::<Readback>();
    registry.register_node::<Sum>();
    registry.register_node::<Double>();
    registry.register_node::<Contributor>();
    registry.register_node::<Collector>();
    registry.register_node::<ResizeListener>();
    registry.register_node::<Fallible>();
    registry.register_node::<History>();
    registry.register_node::<PassThrough>();
    registry.register_node::<OptionalInput>();
    registry.register_node::<StreamValues>();
    registry.register_node::<DrawBatches>();
    Arc::new(registry)
}

// ============================================================================
// Harness
// ============================================================================

/// A dummy device with everything needed to run frames.
pub struct Harness {
    pub device: Arc<DummyDevice>,
    pub render: RenderContext,
    pub graph: FrameGraph,
    pub services: ServiceRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_device(DummyDevice::new(), FrameGraphConfig::default())
    }

    pub fn with_device(device: DummyDevice, config: FrameGraphConfig) -> Self {
        init_logging();
        let device = Arc::new(device);
        let render = RenderContext::new(device.clone(), &config).expect("render context");
        let graph = FrameGraph::new(registry(), device.clone(), &config).expect("frame graph");
        Self {
            device,
            render,
            graph,
            services: ServiceRegistry::new(),
        }
    }

    /// Build only. Returns the build result.
    pub fn build(&mut self) -> Result<(), GraphError> {
        self.render.begin_frame().expect("begin frame");
        self.graph.build(&mut self.render, &self.services)
    }

    /// Execute and submit a frame started by [`build`](Self::build).
    pub fn execute(&mut self) -> (FrameStatus, CommandList) {
        let mut commands = CommandList::new();
        let status = self
            .graph
            .execute(&mut self.render, &self.services, &mut commands)
            .expect("execute");
        let recorded = commands.clone();
        self.render.end_frame(commands).expect("end frame");
        (status, recorded)
    }

    /// Run one full frame. A failed build still executes and submits.
    pub fn frame(&mut self) -> (FrameStatus, CommandList) {
        let _ = self.build();
        self.execute()
    }

    pub fn shutdown(self) -> Arc<DummyDevice> {
        let Harness {
            device,
            mut render,
            graph,
            ..
        } = self;
        graph.shutdown(&mut render.submission);
        render.shutdown().expect("shutdown");
        device
    }
}
