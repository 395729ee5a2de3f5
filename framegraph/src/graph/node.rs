//! Node trait and type-erased node descriptors.

use std::any::Any;
use std::fmt;

use uuid::Uuid;

use super::GraphError;
use super::context::{BuildContext, ExecuteContext, InitContext};
use super::pin::{PinDeclaration, PinDeclarations};

/// Namespace for node type UUIDs.
const NODE_NAMESPACE: Uuid = Uuid::from_u128(0x5f0e_2c1a_7b3d_4e8f_9a61_d2c4_b8e0_f713);

/// Stable identity of a node type, derived from its type name.
///
/// The same type yields the same UUID across rebuilds and runs, which is what
/// lets templates refer to nodes by UUID in their persisted form.
pub fn node_uuid<T: ?Sized + 'static>() -> Uuid {
    Uuid::new_v5(&NODE_NAMESPACE, std::any::type_name::<T>().as_bytes())
}

/// A unit of work in the frame graph.
///
/// Node structs hold their pins as fields and declare them in
/// [`declare_pins`](Self::declare_pins). The graph binds the pins before
/// every frame, then calls [`build`](Self::build) and
/// [`execute`](Self::execute) on active nodes in dependency order.
///
/// ```ignore
/// #[derive(Default)]
/// struct Tonemap {
///     hdr: TexturePin,
///     ldr: TexturePin,
/// }
///
/// impl FrameGraphNode for Tonemap {
///     fn declare_pins(pins: &mut PinDeclarations<Self>) {
///         pins.texture("hdr", |n| &mut n.hdr).required();
///         pins.texture("ldr", |n| &mut n.ldr);
///     }
///
///     fn build(&mut self, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
///         ctx.acquire_texture(self.hdr, ResourceUsage::ShaderRead)?;
///         ctx.create_texture(self.ldr, desc, ResourceUsage::RenderTarget)?;
///         Ok(())
///     }
/// }
/// ```
pub trait FrameGraphNode: Any {
    fn declare_pins(pins: &mut PinDeclarations<Self>)
    where
        Self: Sized;

    /// Called once, the first frame the node is active.
    fn init(&mut self, _ctx: &InitContext<'_>) {}

    /// Declare resources and usages for this frame.
    fn build(&mut self, _ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }

    /// Record commands for this frame.
    fn execute(&mut self, _ctx: &mut ExecuteContext<'_>) -> Result<(), GraphError> {
        Ok(())
    }
}

type CreateFn = fn() -> Box<dyn Any>;
type InitFn = fn(&mut dyn Any, &InitContext<'_>);
type BuildFn = fn(&mut dyn Any, &mut BuildContext<'_>) -> Result<(), GraphError>;
type ExecuteFn = fn(&mut dyn Any, &mut ExecuteContext<'_>) -> Result<(), GraphError>;

/// Everything the graph needs to instantiate and drive a node type.
pub struct NodeDescriptor {
    uuid: Uuid,
    type_name: &'static str,
    name: &'static str,
    pins: Vec<PinDeclaration>,
    create: CreateFn,
    init: InitFn,
    build: BuildFn,
    execute: ExecuteFn,
}

fn create_node<T: FrameGraphNode + Default>() -> Box<dyn Any> {
    Box::new(T::default())
}

fn init_node<T: FrameGraphNode>(node: &mut dyn Any, ctx: &InitContext<'_>) {
    if let Some(node) = node.downcast_mut::<T>() {
        node.init(ctx);
    }
}

fn build_node<T: FrameGraphNode>(
    node: &mut dyn Any,
    ctx: &mut BuildContext<'_>,
) -> Result<(), GraphError> {
    node.downcast_mut::<T>()
        .ok_or_else(|| GraphError::UnknownNode(std::any::type_name::<T>().to_owned()))?
        .build(ctx)
}

fn execute_node<T: FrameGraphNode>(
    node: &mut dyn Any,
    ctx: &mut ExecuteContext<'_>,
) -> Result<(), GraphError> {
    node.downcast_mut::<T>()
        .ok_or_else(|| GraphError::UnknownNode(std::any::type_name::<T>().to_owned()))?
        .execute(ctx)
}

/// Last path segment of a type name, generics stripped.
fn short_type_name(type_name: &'static str) -> &'static str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

impl NodeDescriptor {
    pub(crate) fn of<T: FrameGraphNode + Default>() -> Self {
        let mut pins = PinDeclarations::<T>::new();
        T::declare_pins(&mut pins);

        let type_name = std::any::type_name::<T>();
        Self {
            uuid: node_uuid::<T>(),
            type_name,
            name: short_type_name(type_name),
            pins: pins.into_pins(),
            create: create_node::<T>,
            init: init_node::<T>,
            build: build_node::<T>,
            execute: execute_node::<T>,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pins(&self) -> &[PinDeclaration] {
        &self.pins
    }

    /// Index of the pin called `name`.
    pub fn pin_index(&self, name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.name() == name)
    }

    pub(crate) fn create(&self) -> Box<dyn Any> {
        (self.create)()
    }

    pub(crate) fn init(&self, node: &mut dyn Any, ctx: &InitContext<'_>) {
        (self.init)(node, ctx)
    }

    pub(crate) fn build(&self, node: &mut dyn Any, ctx: &mut BuildContext<'_>) -> Result<(), GraphError> {
        (self.build)(node, ctx)
    }

    pub(crate) fn execute(
        &self,
        node: &mut dyn Any,
        ctx: &mut ExecuteContext<'_>,
    ) -> Result<(), GraphError> {
        (self.execute)(node, ctx)
    }
}

impl fmt::Debug for NodeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDescriptor")
            .field("uuid", &self.uuid)
            .field("type_name", &self.type_name)
            .field("pins", &self.pins)
            .finish()
    }
}
