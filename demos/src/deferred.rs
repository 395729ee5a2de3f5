//! Deferred shading pipeline expressed as frame graph nodes.
//!
//! ```text
//!            ┌──────────┐ depth  ┌──────────┐  hdr  ┌─────────┐  ldr
//! viewport ─►│ GBuffer  │ albedo │ Lighting │──────►│ Tonemap │──────► output
//!            │ (raster) │ normal │(compute) │       │(raster) │   │
//!            └──────────┘───────►└──────────┘       └─────────┘   ▼
//!                                                          ┌───────────┐
//!                                                          │ Histogram │──► luminance
//!                                                          └───────────┘
//! ```

use redlilium_framegraph::backend::GpuCommand;
use redlilium_framegraph::draw::DrawRegistry;
use redlilium_framegraph::graph::{
    BufferDownload, BufferPin, BuildContext, DataPin, ExecuteContext, FrameGraphNode, FrameGraphTemplate,
    GraphError, NodeRegistry, PinDeclarations, TexturePin,
};
use redlilium_framegraph::state::{PassKind, ResourceUsage};
use redlilium_framegraph::types::{
    BufferDescriptor, BufferUsage, DrawIndexedIndirectArgs, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Luminance buckets written by [`HistogramPass`].
pub const HISTOGRAM_BINS: u64 = 64;

const LIGHTING_GROUP_SIZE: u32 = 8;

/// Render resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Raises a frame's resolution change.
pub struct ViewportResized;

fn target(viewport: Viewport, format: TextureFormat, label: &str) -> TextureDescriptor {
    TextureDescriptor::new_2d(viewport.width, viewport.height, format, TextureUsage::empty()).with_label(label)
}

/// Rasterizes every draw batch into depth, albedo and normal targets.
#[derive(Default)]
pub struct GBufferPass {
    viewport: DataPin<Viewport>,
    instances: BufferPin,
    indirect: BufferPin,
    depth: TexturePin,
    albedo: TexturePin,
    normal: TexturePin,
    draw_count: u32,
}

impl FrameGraphNode for GBufferPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("viewport", |n| &mut n.viewport);
        pins.buffer("instances", |n| &mut n.instances);
        pins.buffer("indirect", |n| &mut n.indirect);
        pins.texture("depth", |n| &mut n.depth);
        pins.texture("albedo", |n| &mut n.albedo);
        pins.texture("normal", |n| &mut n.normal);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        let viewport = *ctx.access(self.viewport)?;
        if ctx.has_event::<ViewportResized>() {
            log::debug!("GBufferPass: viewport now {}x{}", viewport.width, viewport.height);
        }

        let draw = ctx
            .service::<DrawRegistry>()
            .ok_or_else(|| GraphError::node_failed("draw registry service is missing"))?;
        let staged = draw
            .draw_calls()
            .first()
            .and_then(|batch| batch.instance_buffers.first())
            .map(|table| table.span);
        let mut args: Vec<DrawIndexedIndirectArgs> = draw
            .draw_calls()
            .iter()
            .flat_map(|batch| draw.indirect_draw_args(batch))
            .collect();

        self.draw_count = args.len() as u32;
        if let Some(span) = staged {
            ctx.create_buffer_from_staged(self.instances, span, ResourceUsage::StorageRead)?;
        }
        if args.is_empty() {
            args.push(DrawIndexedIndirectArgs::default());
        }
        let args_bytes: &[u8] = bytemuck::cast_slice(&args);
        ctx.create_buffer(
            self.indirect,
            BufferDescriptor::new(args_bytes.len() as u64, BufferUsage::empty()).with_label("gbuffer_indirect"),
            ResourceUsage::IndirectRead,
            Some(args_bytes),
        )?;

        ctx.create_texture(
            self.depth,
            target(viewport, TextureFormat::Depth32Float, "gbuffer_depth"),
            ResourceUsage::DepthStencilWrite,
        )?;
        ctx.create_texture(
            self.albedo,
            target(viewport, TextureFormat::Rgba8UnormSrgb, "gbuffer_albedo"),
            ResourceUsage::RenderTarget,
        )?;
        ctx.create_texture(
            self.normal,
            target(viewport, TextureFormat::Rgba16Float, "gbuffer_normal"),
            ResourceUsage::RenderTarget,
        )?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        if self.draw_count == 0 {
            return Ok(());
        }
        let buffer = ctx.buffer(self.indirect)?;
        ctx.commands().push(GpuCommand::DrawIndexedIndirect {
            buffer,
            offset: 0,
            draw_count: self.draw_count,
        });
        Ok(())
    }
}

/// Shades the G-buffer into an HDR target.
#[derive(Default)]
pub struct LightingPass {
    depth: TexturePin,
    albedo: TexturePin,
    normal: TexturePin,
    hdr: TexturePin,
    groups: (u32, u32),
}

impl FrameGraphNode for LightingPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("depth", |n| &mut n.depth).required();
        pins.texture("albedo", |n| &mut n.albedo).required();
        pins.texture("normal", |n| &mut n.normal).required();
        pins.texture("hdr", |n| &mut n.hdr);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Compute);
        let size = ctx.texture_descriptor(self.albedo)?.size;

        ctx.acquire_texture(self.depth, ResourceUsage::ShaderRead)?;
        ctx.acquire_texture(self.albedo, ResourceUsage::ShaderRead)?;
        ctx.acquire_texture(self.normal, ResourceUsage::ShaderRead)?;

        let viewport = Viewport {
            width: size.width,
            height: size.height,
        };
        ctx.create_texture(
            self.hdr,
            target(viewport, TextureFormat::Rgba16Float, "lighting_hdr"),
            ResourceUsage::StorageWrite,
        )?;
        self.groups = (
            size.width.div_ceil(LIGHTING_GROUP_SIZE),
            size.height.div_ceil(LIGHTING_GROUP_SIZE),
        );
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        let (x, y) = self.groups;
        ctx.commands().push(GpuCommand::Dispatch { x, y, z: 1 });
        Ok(())
    }
}

/// Maps HDR to a displayable target with a fullscreen triangle.
#[derive(Default)]
pub struct TonemapPass {
    exposure: DataPin<f32>,
    hdr: TexturePin,
    ldr: TexturePin,
}

impl FrameGraphNode for TonemapPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.data("exposure", |n| &mut n.exposure);
        pins.texture("hdr", |n| &mut n.hdr).required();
        pins.texture("ldr", |n| &mut n.ldr);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Graphics);
        let exposure = *ctx.access(self.exposure)?;
        if !exposure.is_finite() || exposure < 0.0 {
            return Err(GraphError::node_failed(format!("exposure {exposure} is not usable")));
        }

        let size = ctx.texture_descriptor(self.hdr)?.size;
        ctx.acquire_texture(self.hdr, ResourceUsage::ShaderRead)?;
        ctx.create_texture(
            self.ldr,
            target(
                Viewport {
                    width: size.width,
                    height: size.height,
                },
                TextureFormat::Rgba8UnormSrgb,
                "tonemap_ldr",
            ),
            ResourceUsage::RenderTarget,
        )?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        ctx.texture(self.ldr)?;
        ctx.commands().push(GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
        });
        Ok(())
    }
}

/// Bins the tonemapped image by luminance and reads the bins back.
#[derive(Default)]
pub struct HistogramPass {
    ldr: TexturePin,
    bins: BufferPin,
    luminance: DataPin<BufferDownload>,
}

impl FrameGraphNode for HistogramPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("ldr", |n| &mut n.ldr).required();
        pins.buffer("bins", |n| &mut n.bins);
        pins.data("luminance", |n| &mut n.luminance);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.begin_pass(PassKind::Compute);
        ctx.acquire_texture(self.ldr, ResourceUsage::ShaderRead)?;
        ctx.create_buffer(
            self.bins,
            BufferDescriptor::new(HISTOGRAM_BINS * 4, BufferUsage::empty()).with_label("luminance_bins"),
            ResourceUsage::StorageWrite,
            None,
        )?;
        let download = ctx.download(self.bins)?;
        *ctx.access_mut(self.luminance)? = download;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        ctx.commands().push(GpuCommand::Dispatch {
            x: HISTOGRAM_BINS as u32,
            y: 1,
            z: 1,
        });
        Ok(())
    }
}

/// Register the deferred pipeline's nodes.
pub fn register_nodes(registry: &mut NodeRegistry) {
    registry.register_node::<GBufferPass>();
    registry.register_node::<LightingPass>();
    registry.register_node::<TonemapPass>();
    registry.register_node::<HistogramPass>();
}

/// Template with inputs `viewport` and `exposure` and outputs `ldr` and
/// `luminance`.
pub fn deferred_template(registry: &NodeRegistry) -> Result<FrameGraphTemplate, GraphError> {
    let mut template = FrameGraphTemplate::new("deferred");
    let gbuffer = template.add::<GBufferPass>(registry)?;
    let lighting = template.add::<LightingPass>(registry)?;
    let tonemap = template.add::<TonemapPass>(registry)?;
    let histogram = template.add::<HistogramPass>(registry)?;

    for pin in ["depth", "albedo", "normal"] {
        template.connect(gbuffer, pin, lighting, pin)?;
    }
    template.connect(lighting, "hdr", tonemap, "hdr")?;
    template.connect(tonemap, "ldr", histogram, "ldr")?;

    template.make_input("viewport", gbuffer, "viewport")?;
    template.make_input("exposure", tonemap, "exposure")?;
    template.make_output("ldr", tonemap, "ldr")?;
    template.make_output("luminance", histogram, "luminance")?;
    Ok(template)
}
