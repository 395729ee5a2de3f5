//! Frame graph core.
//!
//! A [`FrameGraph`] holds subgraphs instantiated from
//! [`FrameGraphTemplate`]s. Every frame runs in two passes:
//!
//! 1. [`build`](FrameGraph::build) activates the nodes that feed enabled
//!    outputs, sorts them by dependency, binds pins to shared storage and
//!    lets each node declare the resources it creates and uses. The pool then
//!    aliases transient resources whose lifetimes do not overlap.
//! 2. [`execute`](FrameGraph::execute) flushes staged uploads, walks the
//!    nodes in the same order, emits one barrier batch per node from the
//!    declared usages and lets the node record its commands.
//!
//! A failed build leaves the previous frame's memory untouched and the next
//! execute returns [`FrameStatus::Skipped`].
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`FrameGraphNode`] | Trait implemented by node structs |
//! | [`NodeRegistry`] | Node types by UUID |
//! | [`FrameGraphTemplate`] / [`TemplateRegistry`] | Reusable node networks |
//! | [`BuildContext`] / [`ExecuteContext`] | What nodes see in each pass |
//! | [`TexturePin`], [`BufferPin`], [`DataPin`], [`DataSinkPin`] | Node inputs and outputs |

mod compiler;
mod context;
mod dot;
mod node;
mod pin;
mod registry;
mod template;

pub use compiler::GraphError;
pub use context::{BufferDownload, BuildContext, ExecuteContext, FrameStatus, InitContext};
pub use node::{FrameGraphNode, NodeDescriptor, node_uuid};
pub use pin::{
    BufferPin, DataPin, DataSinkPin, DataType, PinDeclaration, PinDeclarations, PinField, PinKind,
    PinStorage, StorageKey, TexturePin,
};
pub use registry::NodeRegistry;
pub use template::{
    FrameGraphTemplate, TemplateEdge, TemplateNode, TemplateNodeId, TemplatePort, TemplateRegistry,
};

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redlilium_core::handle::{Arena, Handle};
use redlilium_core::pool::Pooled;

use crate::backend::{CommandList, GpuCommand, GpuDevice, MemoryBarrier};
use crate::config::FrameGraphConfig;
use crate::error::GraphicsError;
use crate::pool::{ResourceOrigin, TransientId, TransientPool};
use crate::render_context::RenderContext;
use crate::services::ServiceRegistry;
use crate::staging::{StagingRing, StagingSpan};
use crate::state::{
    BarrierBatch, PassKind, PipelineStage, ResourceState, ResourceStateTracker, TrackedResource,
    TrackedState,
};
use crate::submission::SubmissionContext;
use context::{CompiledFrame, NodeRecord};

pub(crate) struct NodeEntry {
    descriptor: Arc<NodeDescriptor>,
    instance: Box<dyn Any>,
    subgraph: SubgraphId,
    pins: Vec<PinId>,
    /// Instantiation sequence, the tie-break of the topological sort.
    seq: u64,
    initialized: bool,
}

pub(crate) struct PinEntry {
    node: NodeId,
    /// Index into the node descriptor's pins.
    declaration: usize,
    kind: PinKind,
    /// Storage the pin owns.
    owned: StorageKey,
    /// Storage the pin reads this frame, after propagation along edges.
    referenced: StorageKey,
}

pub(crate) type NodeId = Handle<NodeEntry>;
type PinId = Handle<PinEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    from: PinId,
    to: PinId,
}

#[derive(Debug)]
struct Port {
    name: String,
    pin: PinId,
    enabled: bool,
}

/// An instantiated template.
#[derive(Debug)]
pub struct Subgraph {
    template: String,
    nodes: Vec<NodeId>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
}

pub type SubgraphId = Handle<Subgraph>;

/// A download whose copy was recorded but not yet read back.
struct PendingDownload {
    submit_index: u64,
    span: StagingSpan,
    target: BufferDownload,
}

pub struct FrameGraph {
    registry: Arc<NodeRegistry>,
    device: Arc<dyn GpuDevice>,
    nodes: Arena<NodeEntry>,
    pins: Arena<PinEntry>,
    storage: Arena<PinStorage>,
    edges: Vec<Edge>,
    subgraphs: Arena<Subgraph>,
    next_seq: u64,
    pool: TransientPool,
    tracker: ResourceStateTracker,
    download_ring: StagingRing,
    pending_downloads: Vec<PendingDownload>,
    /// Active while a successful build waits for execute.
    frame: Pooled<CompiledFrame>,
    events: HashSet<TypeId>,
    frame_index: u64,
}

impl FrameGraph {
    pub fn new(
        registry: Arc<NodeRegistry>,
        device: Arc<dyn GpuDevice>,
        config: &FrameGraphConfig,
    ) -> Result<Self, GraphicsError> {
        let download_ring = StagingRing::with_label(device.clone(), config.download, "download_ring")?;

        Ok(Self {
            registry,
            device,
            nodes: Arena::new(),
            pins: Arena::new(),
            storage: Arena::new(),
            edges: Vec::new(),
            subgraphs: Arena::new(),
            next_seq: 0,
            pool: TransientPool::new(config.pool),
            tracker: ResourceStateTracker::new(),
            download_ring,
            pending_downloads: Vec::new(),
            frame: Pooled::default(),
            events: HashSet::new(),
            frame_index: 0,
        })
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &TransientPool {
        &self.pool
    }

    /// Number of completed build calls.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Create a subgraph from `template`.
    ///
    /// Every node type must be registered; nothing is created if one is not.
    pub fn instantiate(&mut self, template: &FrameGraphTemplate) -> Result<SubgraphId, GraphError> {
        let descriptors = template
            .nodes()
            .iter()
            .map(|node| {
                self.registry
                    .find_node(node.uuid)
                    .cloned()
                    .ok_or_else(|| GraphError::UnknownNode(format!("{} ({})", node.name, node.uuid)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let resolve = |node: TemplateNodeId, pin: &str| -> Result<(usize, usize), GraphError> {
            let descriptor = descriptors
                .get(node.0)
                .ok_or_else(|| GraphError::UnknownNode(format!("template node {}", node.0)))?;
            let index = descriptor.pin_index(pin).ok_or_else(|| GraphError::UnknownPin {
                owner: descriptor.name().to_owned(),
                pin: pin.to_owned(),
            })?;
            Ok((node.0, index))
        };

        let edges = template
            .edges()
            .iter()
            .map(|e| -> Result<_, GraphError> {
                Ok((resolve(e.from_node, &e.from_pin)?, resolve(e.to_node, &e.to_pin)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let inputs = template
            .inputs()
            .iter()
            .map(|p| -> Result<_, GraphError> { Ok((p.name.clone(), resolve(p.node, &p.pin)?)) })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = template
            .outputs()
            .iter()
            .map(|p| -> Result<_, GraphError> { Ok((p.name.clone(), resolve(p.node, &p.pin)?)) })
            .collect::<Result<Vec<_>, _>>()?;

        let subgraph = self.subgraphs.insert(Subgraph {
            template: template.name().to_owned(),
            nodes: Vec::with_capacity(descriptors.len()),
            inputs: Vec::new(),
            outputs: Vec::new(),
        });

        let mut node_pins: Vec<Vec<PinId>> = Vec::with_capacity(descriptors.len());
        let mut node_ids = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let node = self.nodes.insert(NodeEntry {
                instance: descriptor.create(),
                descriptor: descriptor.clone(),
                subgraph,
                pins: Vec::new(),
                seq: self.next_seq,
                initialized: false,
            });
            self.next_seq += 1;

            let pins: Vec<PinId> = descriptor
                .pins()
                .iter()
                .enumerate()
                .map(|(declaration, decl)| {
                    let key = self.storage.insert(PinStorage::new(decl));
                    self.pins.insert(PinEntry {
                        node,
                        declaration,
                        kind: decl.kind(),
                        owned: key,
                        referenced: key,
                    })
                })
                .collect();

            self.nodes[node].pins = pins.clone();
            node_pins.push(pins);
            node_ids.push(node);
        }

        self.edges.extend(edges.iter().map(|&((from_node, from_pin), (to_node, to_pin))| Edge {
            from: node_pins[from_node][from_pin],
            to: node_pins[to_node][to_pin],
        }));

        let entry = &mut self.subgraphs[subgraph];
        entry.nodes = node_ids;
        entry.inputs = inputs
            .into_iter()
            .map(|(name, (n, p))| Port {
                name,
                pin: node_pins[n][p],
                enabled: true,
            })
            .collect();
        entry.outputs = outputs
            .into_iter()
            .map(|(name, (n, p))| Port {
                name,
                pin: node_pins[n][p],
                enabled: true,
            })
            .collect();

        log::debug!(
            "FrameGraph: instantiated '{}' as {subgraph} ({} nodes, {} edges)",
            template.name(),
            entry.nodes.len(),
            edges.len()
        );

        Ok(subgraph)
    }

    /// Drop a subgraph with its nodes, pins, storage and every edge touching them.
    pub fn remove(&mut self, subgraph: SubgraphId) -> Result<(), GraphError> {
        let Some(entry) = self.subgraphs.remove(subgraph) else {
            log::warn!("FrameGraph: remove of unknown subgraph {subgraph}");
            return Err(GraphError::UnknownSubgraph);
        };

        for node in &entry.nodes {
            let Some(node) = self.nodes.remove(*node) else {
                continue;
            };
            for pin in node.pins {
                if let Some(pin) = self.pins.remove(pin) {
                    self.storage.remove(pin.owned);
                }
            }
        }

        let pins = &self.pins;
        self.edges
            .retain(|e| pins.contains(e.from) && pins.contains(e.to));

        log::debug!(
            "FrameGraph: removed subgraph {subgraph} ('{}', {} nodes)",
            entry.template,
            entry.nodes.len()
        );
        Ok(())
    }

    /// Feed `dst_subgraph.input` from `src_subgraph.output`.
    pub fn connect(
        &mut self,
        src_subgraph: SubgraphId,
        output: &str,
        dst_subgraph: SubgraphId,
        input: &str,
    ) -> Result<(), GraphError> {
        let from = self.output_port(src_subgraph, output)?.pin;
        let to = self.input_port(dst_subgraph, input)?.pin;

        let from_kind = self.pin_kind(from)?;
        let to_kind = self.pin_kind(to)?;
        if from_kind != to_kind {
            return Err(GraphError::TypeMismatch {
                pin: input.to_owned(),
                expected: to_kind.to_string(),
                found: from_kind.to_string(),
            });
        }

        if to_kind.is_sink() {
            if self.edges.iter().any(|e| e.from == from) {
                return Err(GraphError::AlreadyConnected { pin: output.to_owned() });
            }
        } else if self.edges.iter().any(|e| e.to == to) {
            return Err(GraphError::AlreadyConnected { pin: input.to_owned() });
        }

        self.edges.push(Edge { from, to });
        log::trace!("FrameGraph: connected {src_subgraph}.{output} -> {dst_subgraph}.{input}");
        Ok(())
    }

    /// Write a value into a subgraph input.
    pub fn set_input<T: 'static>(&mut self, subgraph: SubgraphId, input: &str, value: T) -> Result<(), GraphError> {
        let pin = self.input_port(subgraph, input)?.pin;
        if self.edges.iter().any(|e| e.to == pin) {
            return Err(GraphError::InputConnected { input: input.to_owned() });
        }

        let owned = self.pin_entry(pin)?.owned;
        let storage = self
            .storage
            .get_mut(owned)
            .ok_or_else(|| GraphError::InvalidPin(format!("storage of input '{input}' is gone")))?;
        let kind = storage.kind;
        let slot = storage.downcast_mut::<T>().ok_or_else(|| GraphError::TypeMismatch {
            pin: input.to_owned(),
            expected: kind.to_string(),
            found: std::any::type_name::<T>().to_owned(),
        })?;
        *slot = value;
        Ok(())
    }

    /// Read a subgraph output. Reflects the last execute.
    pub fn get_output<T: 'static>(&self, subgraph: SubgraphId, output: &str) -> Result<&T, GraphError> {
        let pin = self.output_port(subgraph, output)?.pin;
        self.read_pin(pin, output)
    }

    /// Read a subgraph input or, failing that, an output.
    pub fn access<T: 'static>(&self, subgraph: SubgraphId, name: &str) -> Result<&T, GraphError> {
        let pin = match self.input_port(subgraph, name) {
            Ok(port) => port.pin,
            Err(_) => self.output_port(subgraph, name)?.pin,
        };
        self.read_pin(pin, name)
    }

    /// Enable or disable an output. Only enabled outputs activate nodes.
    pub fn set_output_state(&mut self, subgraph: SubgraphId, output: &str, enabled: bool) -> Result<(), GraphError> {
        let entry = self.subgraphs.get_mut(subgraph).ok_or(GraphError::UnknownSubgraph)?;
        let port = entry
            .outputs
            .iter_mut()
            .find(|p| p.name == output)
            .ok_or_else(|| GraphError::UnknownPin {
                owner: entry_name(&entry.template),
                pin: output.to_owned(),
            })?;
        port.enabled = enabled;
        Ok(())
    }

    pub fn disable_all_outputs(&mut self) {
        for subgraph in self.subgraphs.values_mut() {
            for port in &mut subgraph.outputs {
                port.enabled = false;
            }
        }
    }

    pub fn subgraphs(&self) -> Vec<SubgraphId> {
        self.subgraphs.handles()
    }

    /// Template name of a subgraph.
    pub fn subgraph_template(&self, subgraph: SubgraphId) -> Option<&str> {
        self.subgraphs.get(subgraph).map(|s| s.template.as_str())
    }

    /// Output names of a subgraph with their enabled flag.
    pub fn outputs(&self, subgraph: SubgraphId) -> Result<Vec<(&str, bool)>, GraphError> {
        let entry = self.subgraphs.get(subgraph).ok_or(GraphError::UnknownSubgraph)?;
        Ok(entry
            .outputs
            .iter()
            .map(|p| (p.name.as_str(), p.enabled))
            .collect())
    }

    /// Signal `E` to nodes building this frame.
    pub fn push_event<E: 'static>(&mut self) {
        self.events.insert(TypeId::of::<E>());
    }

    /// Build the frame.
    ///
    /// Must run between [`RenderContext::begin_frame`] and [`execute`](Self::execute).
    pub fn build(&mut self, render: &mut RenderContext, services: &ServiceRegistry) -> Result<(), GraphError> {
        redlilium_core::profile_scope!("FrameGraph::build");

        self.frame_index += 1;
        self.frame.release();

        let last_finished = render.submission.poll_completion();
        self.resolve_downloads(last_finished);

        self.pool.begin_build(self.frame_index);
        match self.build_frame(render, services) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.pool.abort_build();
                self.frame.release();
                log::error!("FrameGraph: frame {} build failed, skipping: {err}", self.frame_index);
                Err(err)
            }
        }
    }

    fn build_frame(&mut self, render: &mut RenderContext, services: &ServiceRegistry) -> Result<(), GraphError> {
        let order = self.sort_active_nodes()?;
        self.check_required_pins(&order)?;
        self.propagate_storage(&order)?;

        let active_outputs = self.active_output_storage(&order);
        let frame = self.frame.activate();
        frame.active_outputs = active_outputs;

        for &node in &order {
            let Some(entry) = self.nodes.get_mut(node) else {
                continue;
            };
            if !entry.initialized {
                let ctx = InitContext {
                    device: &self.device,
                    services,
                    frame_index: self.frame_index,
                };
                entry.descriptor.init(entry.instance.as_mut(), &ctx);
                entry.initialized = true;
            }
        }

        let CompiledFrame {
            nodes: records,
            record,
            active_outputs,
        } = frame;

        for (index, &node) in order.iter().enumerate() {
            let Some(entry) = self.nodes.get_mut(node) else {
                continue;
            };
            let owned = entry.pins.iter().map(|&pin| self.pins[pin].owned).collect();
            let mut node_record = NodeRecord::new(node, owned);
            let mut ctx = BuildContext {
                pool: &mut self.pool,
                storage: &mut self.storage,
                staging: &mut render.staging,
                services,
                events: &self.events,
                record: &mut *record,
                node: &mut node_record,
                active_outputs: &*active_outputs,
                subgraph: entry.subgraph,
                node_index: index as u32,
                frame_index: self.frame_index,
                pass: PassKind::None,
            };
            entry
                .descriptor
                .build(entry.instance.as_mut(), &mut ctx)
                .map_err(|err| err.in_node(entry.descriptor.name()))?;
            records.push(node_record);
        }

        // Resources shared between subgraphs live for the whole frame.
        let last = order.len().saturating_sub(1) as u32;
        for &id in &record.cross_subgraph {
            self.pool.extend_lifetime(id, 0)?;
            self.pool.extend_lifetime(id, last)?;
        }

        self.pool.end_build(&mut render.submission)?;

        log::debug!(
            "FrameGraph: frame {} built {} of {} nodes, {} resources, {} uploads",
            self.frame_index,
            order.len(),
            self.nodes.len(),
            record.resources.len(),
            record.uploads.len()
        );
        Ok(())
    }

    /// Active nodes in execution order.
    fn sort_active_nodes(&self) -> Result<Vec<NodeId>, GraphError> {
        let ids = self.nodes.handles();
        let index_of: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let node_index = |pin: PinId| {
            self.pins
                .get(pin)
                .and_then(|p| index_of.get(&p.node).copied())
        };

        let mut producers = vec![Vec::new(); ids.len()];
        let mut dependencies = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            if let (Some(from), Some(to)) = (node_index(edge.from), node_index(edge.to)) {
                producers[to].push(from);
                dependencies.push((from, to));
            }
        }

        let mut roots = Vec::new();
        for subgraph in self.subgraphs.values() {
            if subgraph.outputs.is_empty() {
                roots.extend(subgraph.nodes.iter().filter_map(|n| index_of.get(n).copied()));
            } else {
                roots.extend(
                    subgraph
                        .outputs
                        .iter()
                        .filter(|p| p.enabled)
                        .filter_map(|p| node_index(p.pin)),
                );
            }
        }

        let active = compiler::activate(ids.len(), &roots, &producers);
        let active_nodes: Vec<usize> = (0..ids.len()).filter(|i| active[*i]).collect();
        let mut local = vec![usize::MAX; ids.len()];
        for (position, &node) in active_nodes.iter().enumerate() {
            local[node] = position;
        }

        let sequence: Vec<u64> = active_nodes.iter().map(|&i| self.nodes[ids[i]].seq).collect();
        let local_dependencies: Vec<(usize, usize)> = dependencies
            .iter()
            .filter(|(from, to)| active[*from] && active[*to])
            .map(|&(from, to)| (local[from], local[to]))
            .collect();

        match compiler::topological_order(&sequence, &local_dependencies) {
            Ok(order) => Ok(order.into_iter().map(|l| ids[active_nodes[l]]).collect()),
            Err(stuck) => Err(GraphError::CyclicDependency(
                stuck
                    .into_iter()
                    .map(|l| self.nodes[ids[active_nodes[l]]].descriptor.name().to_owned())
                    .collect(),
            )),
        }
    }

    fn check_required_pins(&self, order: &[NodeId]) -> Result<(), GraphError> {
        let connected: HashSet<PinId> = self.edges.iter().map(|e| e.to).collect();
        let inputs: HashSet<PinId> = self
            .subgraphs
            .values()
            .flat_map(|s| s.inputs.iter().map(|p| p.pin))
            .collect();

        for &node in order {
            let entry = &self.nodes[node];
            for (declaration, pin) in entry.descriptor.pins().iter().zip(&entry.pins) {
                if declaration.is_required() && !connected.contains(pin) && !inputs.contains(pin) {
                    return Err(GraphError::MissingConnection {
                        node: entry.descriptor.name().to_owned(),
                        pin: declaration.name().to_owned(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Point every pin at the storage it reads this frame and bind node fields.
    fn propagate_storage(&mut self, order: &[NodeId]) -> Result<(), GraphError> {
        for storage in self.storage.values_mut() {
            storage.reset();
        }
        for pin in self.pins.values_mut() {
            pin.referenced = pin.owned;
        }

        let mut producer_of: HashMap<PinId, PinId> = HashMap::new();
        let mut consumer_of: HashMap<PinId, PinId> = HashMap::new();
        for edge in &self.edges {
            if self.pins.get(edge.to).is_some_and(|p| p.kind.is_sink()) {
                consumer_of.insert(edge.from, edge.to);
            } else {
                producer_of.insert(edge.to, edge.from);
            }
        }

        // Regular pins read their producer's storage.
        for &node in order {
            for &pin in &self.nodes[node].pins {
                if let Some(&producer) = producer_of.get(&pin) {
                    let referenced = self.pins[producer].referenced;
                    self.pins[pin].referenced = referenced;
                }
            }
        }

        // Sink providers write into their consumer's storage.
        for &node in order.iter().rev() {
            for &pin in &self.nodes[node].pins {
                if let Some(&consumer) = consumer_of.get(&pin) {
                    let referenced = self.pins[consumer].referenced;
                    self.pins[pin].referenced = referenced;
                }
            }
        }

        for &node in order {
            let entry = &mut self.nodes[node];
            for &pin in &entry.pins {
                let pin = &self.pins[pin];
                let declaration = &entry.descriptor.pins()[pin.declaration];
                if !declaration.bind(entry.instance.as_mut(), pin.referenced) {
                    return Err(GraphError::InvalidPin(format!(
                        "failed to bind '{}' on {}",
                        declaration.name(),
                        entry.descriptor.name()
                    )));
                }
            }
        }

        Ok(())
    }

    fn active_output_storage(&self, order: &[NodeId]) -> HashSet<StorageKey> {
        let active: HashSet<NodeId> = order.iter().copied().collect();
        let mut keys = HashSet::new();

        for edge in &self.edges {
            let (Some(from), Some(to)) = (self.pins.get(edge.from), self.pins.get(edge.to)) else {
                continue;
            };
            if active.contains(&to.node) {
                keys.insert(from.referenced);
            }
        }
        for subgraph in self.subgraphs.values() {
            for port in subgraph.outputs.iter().filter(|p| p.enabled) {
                if let Some(pin) = self.pins.get(port.pin) {
                    keys.insert(pin.referenced);
                }
            }
        }
        keys
    }

    /// Record the frame's commands.
    ///
    /// Returns [`FrameStatus::Skipped`] without touching `commands` when the
    /// last build failed.
    pub fn execute(
        &mut self,
        render: &mut RenderContext,
        services: &ServiceRegistry,
        commands: &mut CommandList,
    ) -> Result<FrameStatus, GraphError> {
        redlilium_core::profile_scope!("FrameGraph::execute");

        if !self.frame.is_active() {
            log::debug!("FrameGraph: frame {} has no valid build, skipping execute", self.frame_index);
            self.events.clear();
            return Ok(FrameStatus::Skipped);
        }

        let submit_index = render.submission.get_submit_index();
        self.download_ring.begin_frame(submit_index);

        let result = self.execute_frame(render, services, commands, submit_index);

        if let Some(frame) = self.frame.get() {
            store_stable_tracking(&mut self.pool, &self.tracker, &frame.record.resources);
        }
        self.tracker.clear();
        self.download_ring.end_frame();
        self.pool.finish_frame(submit_index);
        self.frame.release();
        self.events.clear();

        if let Err(err) = &result {
            log::error!("FrameGraph: frame {} execute failed: {err}", self.frame_index);
        }
        result.map(|()| FrameStatus::Executed)
    }

    fn execute_frame(
        &mut self,
        render: &mut RenderContext,
        services: &ServiceRegistry,
        commands: &mut CommandList,
        submit_index: u64,
    ) -> Result<(), GraphError> {
        let Some(frame) = self.frame.get() else {
            return Ok(());
        };

        if !frame.record.uploads.is_empty() {
            commands.push(GpuCommand::MemoryBarrier(MemoryBarrier::HOST_TO_TRANSFER));
            for upload in &frame.record.uploads {
                let buffer = self
                    .pool
                    .get_buffer(upload.buffer)
                    .ok_or(GraphicsError::InvalidHandle("buffer"))?;
                render.staging.upload(commands, upload.span, buffer, 0);
            }
            commands.push(GpuCommand::MemoryBarrier(MemoryBarrier::TRANSFER_TO_ALL));
        }

        for &id in &frame.record.resources {
            let resource = tracked_resource(&self.pool, id)?;
            let origin = match id {
                TransientId::Texture(t) => self.pool.texture_origin(t),
                TransientId::Buffer(b) => self.pool.buffer_origin(b),
            };
            let initial = match origin {
                Some(ResourceOrigin::Stable(_)) => self.pool.fetch_tracking(id).unwrap_or_default(),
                Some(ResourceOrigin::External) => {
                    frame.record.imports.get(&id).copied().unwrap_or_default()
                }
                _ => TrackedState::default(),
            };
            self.tracker.add_tracking(resource, initial.stage, initial.state);
        }

        for record in &frame.nodes {
            let mut batch = BarrierBatch::new();
            for usage in &record.usages {
                let resource = tracked_resource(&self.pool, usage.resource)?;
                let transition = self.tracker.add_transition(resource, usage.stage, usage.state)?;
                batch.add(resource, transition);
            }
            commands.pipeline_barrier(batch);

            let Some(entry) = self.nodes.get_mut(record.node) else {
                log::warn!("FrameGraph: node {} was removed between build and execute", record.node);
                continue;
            };
            let name = entry.descriptor.name();

            commands.begin_label(name);
            let mut ctx = ExecuteContext {
                pool: &self.pool,
                storage: &mut self.storage,
                staging: &mut render.staging,
                commands: &mut *commands,
                services,
                owned: &record.owned,
                frame_index: self.frame_index,
            };
            let result = entry.descriptor.execute(entry.instance.as_mut(), &mut ctx);
            commands.end_label();
            result.map_err(|err| err.in_node(name))?;

            for download in &record.downloads {
                let buffer = self
                    .pool
                    .get_buffer(download.buffer)
                    .ok_or(GraphicsError::InvalidHandle("buffer"))?;
                let size = self
                    .pool
                    .buffer_descriptor(download.buffer)
                    .map_or(0, |d| d.size);
                if size == 0 {
                    download.target.fulfill(Vec::new());
                    continue;
                }

                let transition =
                    self.tracker
                        .add_transition(buffer, PipelineStage::Transfer, ResourceState::TransferSource)?;
                let mut batch = BarrierBatch::new();
                batch.add(buffer.into(), transition);
                commands.pipeline_barrier(batch);

                let span = self.download_ring.stage_allocate(size)?;
                self.download_ring.download(commands, buffer, 0, span);
                self.pending_downloads.push(PendingDownload {
                    submit_index,
                    span,
                    target: download.target.clone(),
                });
            }
        }

        Ok(())
    }

    /// Read back every download whose submission has completed.
    fn resolve_downloads(&mut self, last_finished: u64) {
        let ring = &self.download_ring;
        self.pending_downloads.retain(|pending| {
            if pending.submit_index > last_finished {
                return true;
            }
            let mut bytes = vec![0u8; pending.span.size() as usize];
            match ring.copy_from(&mut bytes, pending.span, 0) {
                Ok(()) => pending.target.fulfill(bytes),
                Err(err) => log::error!("FrameGraph: download read back failed: {err}"),
            }
            false
        });
        self.download_ring.notify_finished_frames(last_finished);
    }

    /// Hand the pool and the download ring to deferred destruction.
    pub fn shutdown(mut self, submission: &mut SubmissionContext) {
        log::info!(
            "FrameGraph: shutting down ({} subgraphs, {} nodes)",
            self.subgraphs.len(),
            self.nodes.len()
        );
        self.pool.shutdown(submission);
        self.download_ring.shutdown(submission);
    }

    fn input_port(&self, subgraph: SubgraphId, name: &str) -> Result<&Port, GraphError> {
        let entry = self.subgraphs.get(subgraph).ok_or(GraphError::UnknownSubgraph)?;
        entry
            .inputs
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| GraphError::UnknownPin {
                owner: entry_name(&entry.template),
                pin: name.to_owned(),
            })
    }

    fn output_port(&self, subgraph: SubgraphId, name: &str) -> Result<&Port, GraphError> {
        let entry = self.subgraphs.get(subgraph).ok_or(GraphError::UnknownSubgraph)?;
        entry
            .outputs
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| GraphError::UnknownPin {
                owner: entry_name(&entry.template),
                pin: name.to_owned(),
            })
    }

    fn pin_entry(&self, pin: PinId) -> Result<&PinEntry, GraphError> {
        self.pins
            .get(pin)
            .ok_or_else(|| GraphError::InvalidPin(format!("pin {pin} no longer exists")))
    }

    fn pin_kind(&self, pin: PinId) -> Result<PinKind, GraphError> {
        self.pin_entry(pin).map(|p| p.kind)
    }

    fn read_pin<T: 'static>(&self, pin: PinId, name: &str) -> Result<&T, GraphError> {
        let referenced = self.pin_entry(pin)?.referenced;
        let storage = self
            .storage
            .get(referenced)
            .ok_or_else(|| GraphError::InvalidPin(format!("storage of '{name}' is gone")))?;
        storage.downcast_ref::<T>().ok_or_else(|| GraphError::TypeMismatch {
            pin: name.to_owned(),
            expected: storage.kind.to_string(),
            found: std::any::type_name::<T>().to_owned(),
        })
    }
}

fn entry_name(template: &str) -> String {
    format!("subgraph '{template}'")
}

fn tracked_resource(pool: &TransientPool, id: TransientId) -> Result<TrackedResource, GraphicsError> {
    match id {
        TransientId::Texture(t) => pool
            .get_texture(t)
            .map(TrackedResource::from)
            .ok_or(GraphicsError::InvalidHandle("texture")),
        TransientId::Buffer(b) => pool
            .get_buffer(b)
            .map(TrackedResource::from)
            .ok_or(GraphicsError::InvalidHandle("buffer")),
    }
}

/// Remember where stable resources ended the frame.
fn store_stable_tracking(pool: &mut TransientPool, tracker: &ResourceStateTracker, resources: &[TransientId]) {
    for &id in resources {
        let stable = match id {
            TransientId::Texture(t) => matches!(pool.texture_origin(t), Some(ResourceOrigin::Stable(_))),
            TransientId::Buffer(b) => matches!(pool.buffer_origin(b), Some(ResourceOrigin::Stable(_))),
        };
        if !stable {
            continue;
        }
        let state = tracked_resource(pool, id)
            .ok()
            .and_then(|resource| tracker.try_get_state(resource));
        if let Some(state) = state {
            pool.store_tracking(id, state);
        }
    }
}

impl std::fmt::Debug for FrameGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGraph")
            .field("subgraphs", &self.subgraphs.len())
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("frame_index", &self.frame_index)
            .field("pool", &self.pool)
            .finish()
    }
}
