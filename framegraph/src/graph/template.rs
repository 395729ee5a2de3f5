//! Graph templates.
//!
//! A template is a reusable node network described only by node UUIDs and
//! pin names. Instantiating it in a [`FrameGraph`](super::FrameGraph)
//! produces a subgraph whose inputs and outputs are the template's ports.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use super::GraphError;
use super::node::{FrameGraphNode, node_uuid};
use super::pin::PinKind;
use super::registry::NodeRegistry;

/// Index of a node inside a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateNodeId(pub usize);

/// A node of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNode {
    pub uuid: Uuid,
    pub name: String,
}

/// A pin-to-pin connection between two template nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateEdge {
    pub from_node: TemplateNodeId,
    pub from_pin: String,
    pub to_node: TemplateNodeId,
    pub to_pin: String,
}

/// A named node pin exposed as a subgraph input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePort {
    pub name: String,
    pub node: TemplateNodeId,
    pub pin: String,
}

#[derive(Debug, Clone)]
struct PinLayout {
    pins: Vec<(String, PinKind)>,
}

impl PinLayout {
    fn kind(&self, pin: &str) -> Option<PinKind> {
        self.pins.iter().find(|(name, _)| name == pin).map(|(_, kind)| *kind)
    }
}

#[derive(Debug, Clone)]
pub struct FrameGraphTemplate {
    name: String,
    nodes: Vec<TemplateNode>,
    layouts: Vec<PinLayout>,
    edges: Vec<TemplateEdge>,
    inputs: Vec<TemplatePort>,
    outputs: Vec<TemplatePort>,
}

impl FrameGraphTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            layouts: Vec::new(),
            edges: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a node of the registered type `uuid`.
    pub fn add_node(&mut self, registry: &NodeRegistry, uuid: Uuid) -> Result<TemplateNodeId, GraphError> {
        let descriptor = registry
            .find_node(uuid)
            .ok_or_else(|| GraphError::UnknownNode(uuid.to_string()))?;

        let id = TemplateNodeId(self.nodes.len());
        self.nodes.push(TemplateNode {
            uuid,
            name: descriptor.name().to_owned(),
        });
        self.layouts.push(PinLayout {
            pins: descriptor
                .pins()
                .iter()
                .map(|p| (p.name().to_owned(), p.kind()))
                .collect(),
        });
        Ok(id)
    }

    /// Add a node of type `T`, which must already be registered.
    pub fn add<T: FrameGraphNode>(&mut self, registry: &NodeRegistry) -> Result<TemplateNodeId, GraphError> {
        self.add_node(registry, node_uuid::<T>())
    }

    /// Connect `from.from_pin` to `to.to_pin`.
    ///
    /// Both pins must have the same kind. A regular pin accepts one producer;
    /// a sink pin accepts many providers but forwards to one consumer.
    pub fn connect(
        &mut self,
        from: TemplateNodeId,
        from_pin: &str,
        to: TemplateNodeId,
        to_pin: &str,
    ) -> Result<(), GraphError> {
        let from_kind = self.pin_kind(from, from_pin)?;
        let to_kind = self.pin_kind(to, to_pin)?;

        if from_kind != to_kind {
            return Err(GraphError::TypeMismatch {
                pin: to_pin.to_owned(),
                expected: to_kind.to_string(),
                found: from_kind.to_string(),
            });
        }

        let already = if to_kind.is_sink() {
            self.edges
                .iter()
                .any(|e| e.from_node == from && e.from_pin == from_pin)
        } else {
            self.edges.iter().any(|e| e.to_node == to && e.to_pin == to_pin)
        };
        if already {
            let pin = if to_kind.is_sink() { from_pin } else { to_pin };
            return Err(GraphError::AlreadyConnected { pin: pin.to_owned() });
        }

        self.edges.push(TemplateEdge {
            from_node: from,
            from_pin: from_pin.to_owned(),
            to_node: to,
            to_pin: to_pin.to_owned(),
        });
        Ok(())
    }

    /// Expose `node.pin` as the subgraph input `name`.
    pub fn make_input(&mut self, name: &str, node: TemplateNodeId, pin: &str) -> Result<(), GraphError> {
        self.pin_kind(node, pin)?;
        if self.inputs.iter().any(|p| p.name == name) {
            return Err(GraphError::AlreadyConnected { pin: name.to_owned() });
        }
        self.inputs.push(TemplatePort {
            name: name.to_owned(),
            node,
            pin: pin.to_owned(),
        });
        Ok(())
    }

    /// Expose `node.pin` as the subgraph output `name`.
    pub fn make_output(&mut self, name: &str, node: TemplateNodeId, pin: &str) -> Result<(), GraphError> {
        self.pin_kind(node, pin)?;
        if self.outputs.iter().any(|p| p.name == name) {
            return Err(GraphError::AlreadyConnected { pin: name.to_owned() });
        }
        self.outputs.push(TemplatePort {
            name: name.to_owned(),
            node,
            pin: pin.to_owned(),
        });
        Ok(())
    }

    pub fn nodes(&self) -> &[TemplateNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[TemplateEdge] {
        &self.edges
    }

    pub fn inputs(&self) -> &[TemplatePort] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TemplatePort] {
        &self.outputs
    }

    fn pin_kind(&self, node: TemplateNodeId, pin: &str) -> Result<PinKind, GraphError> {
        let layout = self
            .layouts
            .get(node.0)
            .ok_or_else(|| GraphError::UnknownNode(format!("template node {}", node.0)))?;
        layout.kind(pin).ok_or_else(|| GraphError::UnknownPin {
            owner: self.nodes[node.0].name.clone(),
            pin: pin.to_owned(),
        })
    }
}

/// Templates by name.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<FrameGraphTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, replacing any template with the same name.
    pub fn register(&mut self, template: FrameGraphTemplate) -> Arc<FrameGraphTemplate> {
        let template = Arc::new(template);
        if self
            .templates
            .insert(template.name.clone(), template.clone())
            .is_some()
        {
            log::debug!("TemplateRegistry: replaced template '{}'", template.name);
        }
        template
    }

    pub fn get(&self, name: &str) -> Result<&Arc<FrameGraphTemplate>, GraphError> {
        self.templates
            .get(name)
            .ok_or_else(|| GraphError::UnknownTemplate(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::pin::{DataPin, DataSinkPin, PinDeclarations, TexturePin};

    #[derive(Default)]
    struct Producer {
        color: TexturePin,
        lights: DataSinkPin<u32>,
    }

    impl FrameGraphNode for Producer {
        fn declare_pins(pins: &mut PinDeclarations<Self>) {
            pins.texture("color", |n| &mut n.color);
            pins.sink("lights", |n| &mut n.lights);
        }
    }

    #[derive(Default)]
    struct Consumer {
        color: TexturePin,
        scale: DataPin<f32>,
        lights: DataSinkPin<u32>,
    }

    impl FrameGraphNode for Consumer {
        fn declare_pins(pins: &mut PinDeclarations<Self>) {
            pins.texture("color", |n| &mut n.color).required();
            pins.data("scale", |n| &mut n.scale);
            pins.sink("lights", |n| &mut n.lights);
        }
    }

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register_node::<Producer>();
        registry.register_node::<Consumer>();
        registry
    }

    #[test]
    fn test_connect_validates() {
        let registry = registry();
        let mut template = FrameGraphTemplate::new("test");
        let a = template.add::<Producer>(&registry).unwrap();
        let b = template.add::<Consumer>(&registry).unwrap();
        let c = template.add::<Producer>(&registry).unwrap();

        template.connect(a, "color", b, "color").unwrap();
        assert_eq!(
            template.connect(c, "color", b, "color"),
            Err(GraphError::AlreadyConnected { pin: "color".into() })
        );
        assert!(matches!(
            template.connect(a, "color", b, "scale"),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert_eq!(
            template.connect(a, "missing", b, "color"),
            Err(GraphError::UnknownPin {
                owner: "Producer".into(),
                pin: "missing".into()
            })
        );
        assert_eq!(template.edges().len(), 1);
    }

    #[test]
    fn test_sink_accepts_many_providers() {
        let registry = registry();
        let mut template = FrameGraphTemplate::new("sinks");
        let a = template.add::<Producer>(&registry).unwrap();
        let b = template.add::<Producer>(&registry).unwrap();
        let consumer = template.add::<Consumer>(&registry).unwrap();
        let other = template.add::<Consumer>(&registry).unwrap();

        template.connect(a, "lights", consumer, "lights").unwrap();
        template.connect(b, "lights", consumer, "lights").unwrap();
        assert!(matches!(
            template.connect(a, "lights", other, "lights"),
            Err(GraphError::AlreadyConnected { .. })
        ));
    }

    #[test]
    fn test_ports() {
        let registry = registry();
        let mut template = FrameGraphTemplate::new("ports");
        let b = template.add::<Consumer>(&registry).unwrap();

        template.make_input("scale", b, "scale").unwrap();
        template.make_output("out", b, "color").unwrap();
        assert!(template.make_input("scale", b, "scale").is_err());
        assert!(template.make_output("bad", b, "nope").is_err());
        assert_eq!(template.inputs()[0].pin, "scale");
    }

    #[test]
    fn test_unknown_node_and_template() {
        let registry = NodeRegistry::new();
        let mut template = FrameGraphTemplate::new("empty");
        assert!(matches!(
            template.add::<Producer>(&registry),
            Err(GraphError::UnknownNode(_))
        ));

        let mut templates = TemplateRegistry::new();
        templates.register(template);
        assert!(templates.get("empty").is_ok());
        assert_eq!(
            templates.get("other").err(),
            Some(GraphError::UnknownTemplate("other".into()))
        );
    }
}
