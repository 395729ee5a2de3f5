//! # Deferred Demo
//!
//! Runs the deferred pipeline over the grid scene for a number of frames on
//! the dummy device and logs what the frame graph did.
//!
//! ```text
//! deferred_demo [frames] [--dot]
//! ```
//!
//! With `--dot` the graph is printed in Graphviz syntax after the first frame.

use std::sync::Arc;

use redlilium_demos::deferred::{self, HISTOGRAM_BINS, Viewport, ViewportResized};
use redlilium_demos::scene::GridScene;
use redlilium_framegraph::graph::BufferDownload;
use redlilium_framegraph::{
    CommandList, DrawRegistry, DummyDevice, FrameGraph, FrameGraphConfig, FrameStatus, GraphError, NodeRegistry,
    RenderContext, ServiceRegistry,
};

const DEFAULT_FRAMES: u64 = 8;

struct Args {
    frames: u64,
    dot: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = Self {
            frames: DEFAULT_FRAMES,
            dot: false,
        };
        for arg in std::env::args().skip(1) {
            match arg.as_str() {
                "--dot" => args.dot = true,
                other => match other.parse() {
                    Ok(frames) => args.frames = frames,
                    Err(_) => log::warn!("Ignoring unknown argument '{other}'"),
                },
            }
        }
        args
    }
}

fn run(args: &Args) -> Result<(), GraphError> {
    let config = FrameGraphConfig::default();
    let device = Arc::new(DummyDevice::new());

    let mut registry = NodeRegistry::new();
    deferred::register_nodes(&mut registry);
    let template = deferred::deferred_template(&registry)?;

    let mut render = RenderContext::new(device.clone(), &config)?;
    let mut graph = FrameGraph::new(Arc::new(registry), device.clone(), &config)?;
    let main = graph.instantiate(&template)?;
    graph.set_input(main, "exposure", 1.0f32)?;

    let mut draw = DrawRegistry::new(device.clone(), config.draw)?;
    render.begin_frame()?;
    let scene = GridScene::new(&mut draw, &mut render.staging)?;
    let mut commands = CommandList::new();
    draw.flush_uploads(&mut commands, &render.staging);
    render.end_frame(commands)?;

    let mut services = ServiceRegistry::new();
    services.insert(draw);

    let mut readback: Option<BufferDownload> = None;

    for frame in 0..args.frames {
        redlilium_core::profile_scope!("deferred_demo::frame");

        // Halve the resolution halfway through to exercise reallocation.
        if frame == args.frames / 2 {
            graph.set_input(main, "viewport", Viewport { width: 640, height: 360 })?;
            graph.push_event::<ViewportResized>();
        }

        render.begin_frame()?;
        if let Some(draw) = services.get_mut::<DrawRegistry>() {
            scene.submit(draw, &mut render.staging)?;
        }
        if let Err(err) = graph.build(&mut render, &services) {
            log::error!("Frame {frame}: build failed: {err}");
        }
        // Completed downloads are resolved during build.
        if let Some(bins) = readback.take().and_then(|download| download.try_take()) {
            log::debug!("Frame {frame}: {} luminance bins read back", bins.len() as u64 / 4);
            debug_assert_eq!(bins.len() as u64, HISTOGRAM_BINS * 4);
        }

        let mut commands = CommandList::new();
        let status = graph.execute(&mut render, &services, &mut commands)?;
        log::info!(
            "Frame {frame}: {status:?}, {} commands, {} texture slots",
            commands.len(),
            graph.pool().texture_slot_count()
        );
        render.end_frame(commands)?;

        if status == FrameStatus::Executed {
            readback = Some(graph.get_output::<BufferDownload>(main, "luminance")?.clone());
        }

        if frame == 0 && args.dot {
            let mut dot = String::new();
            if graph.write_dot(&mut dot).is_ok() {
                println!("{dot}");
            }
        }
    }

    let stats = device.stats();
    log::info!(
        "Done: {} submissions, {} textures and {} buffers created",
        stats.submissions,
        stats.textures_created,
        stats.buffers_created
    );

    graph.shutdown(&mut render.submission);
    if let Some(draw) = services.remove::<DrawRegistry>() {
        draw.shutdown(&mut render.submission);
    }
    render.shutdown()?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting RedLilium Deferred Demo");
    log::info!("Core version: {}", redlilium_core::VERSION);
    log::info!("Frame graph version: {}", redlilium_framegraph::VERSION);
    redlilium_framegraph::init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        log::error!("Deferred demo failed: {err}");
        std::process::exit(1);
    }
}
