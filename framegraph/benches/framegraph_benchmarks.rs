use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use uuid::Uuid;

use redlilium_framegraph::draw::{InstanceRecord, MeshData, MeshProvider};
use redlilium_framegraph::graph::{BuildContext, FrameGraphNode, GraphError, PinDeclarations, TexturePin};
use redlilium_framegraph::pool::{LifetimeRange, assign_slots};
use redlilium_framegraph::state::ResourceUsage;
use redlilium_framegraph::types::{TextureDescriptor, TextureFormat, TextureUsage};
use redlilium_framegraph::{
    CommandList, DrawRegistry, DummyDevice, FrameGraph, FrameGraphConfig, FrameGraphTemplate, NodeRegistry,
    RenderContext, ServiceRegistry,
};

fn target() -> TextureDescriptor {
    TextureDescriptor::new_2d(256, 256, TextureFormat::Rgba8Unorm, TextureUsage::empty())
}

#[derive(Default)]
struct HeadPass {
    out: TexturePin,
}

impl FrameGraphNode for HeadPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.create_texture(self.out, target(), ResourceUsage::RenderTarget)?;
        Ok(())
    }
}

#[derive(Default)]
struct ChainPass {
    input: TexturePin,
    out: TexturePin,
}

impl FrameGraphNode for ChainPass {
    fn declare_pins(pins: &mut PinDeclarations<Self>) {
        pins.texture("input", |n| &mut n.input).required();
        pins.texture("out", |n| &mut n.out);
    }

    fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        ctx.acquire_texture(self.input, ResourceUsage::ShaderRead)?;
        ctx.create_texture(self.out, target(), ResourceUsage::RenderTarget)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph build
// ---------------------------------------------------------------------------

fn bench_build_chain(c: &mut Criterion) {
    let mut registry = NodeRegistry::new();
    registry.register_node::<HeadPass>();
    registry.register_node::<ChainPass>();
    let registry = Arc::new(registry);

    let mut template = FrameGraphTemplate::new("chain");
    let mut previous = template.add::<HeadPass>(&registry).unwrap();
    for _ in 1..64 {
        let node = template.add::<ChainPass>(&registry).unwrap();
        template.connect(previous, "out", node, "input").unwrap();
        previous = node;
    }

    let config = FrameGraphConfig::default();
    let device = Arc::new(DummyDevice::new());
    let mut render = RenderContext::new(device.clone(), &config).unwrap();
    let mut graph = FrameGraph::new(registry, device, &config).unwrap();
    graph.instantiate(&template).unwrap();
    let services = ServiceRegistry::new();

    c.bench_function("frame_graph_chain_64", |b| {
        b.iter(|| {
            render.begin_frame().unwrap();
            graph.build(&mut render, &services).unwrap();
            let mut commands = CommandList::new();
            black_box(graph.execute(&mut render, &services, &mut commands).unwrap());
            render.end_frame(commands).unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Slot assignment
// ---------------------------------------------------------------------------

fn bench_assign_slots(c: &mut Criterion) {
    let items: Vec<(LifetimeRange, u32)> = (0..1024u32)
        .map(|i| (LifetimeRange::new(i, i + 1 + i % 7), i % 3))
        .collect();

    c.bench_function("assign_slots_1024", |b| {
        b.iter(|| black_box(assign_slots(&items, |a, b| a == b)));
    });
}

// ---------------------------------------------------------------------------
// Draw batching
// ---------------------------------------------------------------------------

struct Triangles;

impl MeshProvider for Triangles {
    fn load_mesh(&self, _uuid: Uuid) -> Option<MeshData> {
        Some(MeshData::with_u32_indices(&[[0.0f32; 3]; 3], &[0, 1, 2]))
    }
}

fn bench_generate_draw_calls(c: &mut Criterion) {
    let config = FrameGraphConfig::default();
    let device = Arc::new(DummyDevice::new());
    let mut render = RenderContext::new(device.clone(), &config).unwrap();
    let mut draw = DrawRegistry::new(device, config.draw).unwrap();
    let transform = draw.register_instance_data("transform", 64);

    render.begin_frame().unwrap();
    let meshes: Vec<_> = (0..16u128)
        .map(|i| draw.get_or_create_mesh(Uuid::from_u128(i), &Triangles, &mut render.staging).unwrap())
        .collect();
    render.end_frame(CommandList::new()).unwrap();

    let matrix = [0u8; 64];
    let data = [(transform, &matrix[..])];
    let instances: Vec<_> = (0..4096u64)
        .map(|entity| InstanceRecord {
            entity,
            mesh: meshes[entity as usize % meshes.len()],
            data: &data,
        })
        .collect();

    c.bench_function("generate_draw_calls_4096", |b| {
        b.iter(|| {
            render.begin_frame().unwrap();
            draw.generate_draw_calls(&instances, &mut render.staging).unwrap();
            black_box(draw.draw_calls().len());
            render.end_frame(CommandList::new()).unwrap();
        });
    });
}

criterion_group!(benches, bench_build_chain, bench_assign_slots, bench_generate_draw_calls);
criterion_main!(benches);
