//! Node type registry.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::node::{FrameGraphNode, NodeDescriptor, node_uuid};

/// Node types known to a graph, keyed by [`node_uuid`].
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: HashMap<Uuid, Arc<NodeDescriptor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T`. Registering a type again keeps the first descriptor.
    pub fn register_node<T: FrameGraphNode + Default>(&mut self) -> Uuid {
        let uuid = node_uuid::<T>();
        self.nodes.entry(uuid).or_insert_with(|| {
            let descriptor = NodeDescriptor::of::<T>();
            log::trace!(
                "NodeRegistry: registered {} ({uuid}, {} pins)",
                descriptor.type_name(),
                descriptor.pins().len()
            );
            Arc::new(descriptor)
        });
        uuid
    }

    pub fn find_node(&self, uuid: Uuid) -> Option<&Arc<NodeDescriptor>> {
        self.nodes.get(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.nodes.contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeDescriptor>> + '_ {
        self.nodes.values()
    }
}
