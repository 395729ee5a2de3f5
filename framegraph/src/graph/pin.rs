//! Pins and pin storage.
//!
//! A pin is a field on a node struct. It holds nothing but a key into the
//! graph's pin storage, which the graph rebinds every frame: a consumer's pin
//! points at its producer's storage, so both nodes see the same resource or
//! value without copying.

use std::any::{Any, TypeId};
use std::fmt;
use std::marker::PhantomData;

use redlilium_core::handle::Handle;

use crate::pool::{TransientBufferId, TransientTextureId};

/// Type-erased value behind a pin.
pub struct PinStorage {
    pub(crate) value: Box<dyn Any>,
    pub(crate) kind: PinKind,
    pub(crate) reset: Option<fn(&mut dyn Any)>,
}

impl PinStorage {
    pub(crate) fn new(declaration: &PinDeclaration) -> Self {
        Self {
            value: (declaration.create_storage)(),
            kind: declaration.kind,
            reset: declaration.reset,
        }
    }

    /// Reset per-frame contents (resource handles, sink vectors).
    pub(crate) fn reset(&mut self) {
        if let Some(reset) = self.reset {
            reset(self.value.as_mut());
        }
    }

    pub(crate) fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub(crate) fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut()
    }
}

impl fmt::Debug for PinStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinStorage").field("kind", &self.kind).finish()
    }
}

pub type StorageKey = Handle<PinStorage>;

/// Identity of the Rust type carried by a data or sink pin.
#[derive(Debug, Clone, Copy, Eq)]
pub struct DataType {
    id: TypeId,
    name: &'static str,
}

impl DataType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl std::hash::Hash for DataType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// What a pin carries. Only pins of equal kind can be connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinKind {
    Texture,
    Buffer,
    Data(DataType),
    Sink(DataType),
}

impl PinKind {
    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Sink(_))
    }
}

impl fmt::Display for PinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Texture => write!(f, "texture"),
            Self::Buffer => write!(f, "buffer"),
            Self::Data(ty) => write!(f, "data<{}>", ty.name),
            Self::Sink(ty) => write!(f, "sink<{}>", ty.name),
        }
    }
}

/// A node field that can be declared as a pin.
pub trait PinField: 'static {
    fn kind() -> PinKind;

    /// Fresh storage owned by a pin of this kind.
    fn create_storage() -> Box<dyn Any>;

    /// Per-frame reset of the owned storage.
    fn reset() -> Option<fn(&mut dyn Any)> {
        None
    }

    fn storage_key(&self) -> Option<StorageKey>;

    fn bind(&mut self, key: StorageKey);
}

/// Texture produced or consumed by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TexturePin {
    storage: Option<StorageKey>,
}

/// Buffer produced or consumed by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPin {
    storage: Option<StorageKey>,
}

/// Typed value passed between nodes.
pub struct DataPin<T> {
    storage: Option<StorageKey>,
    _marker: PhantomData<fn() -> T>,
}

/// Vector cleared every frame that many providers push into and one consumer reads.
pub struct DataSinkPin<T> {
    storage: Option<StorageKey>,
    _marker: PhantomData<fn() -> T>,
}

macro_rules! typed_pin_impls {
    ($pin:ident) => {
        impl<T> Default for $pin<T> {
            fn default() -> Self {
                Self {
                    storage: None,
                    _marker: PhantomData,
                }
            }
        }

        impl<T> Clone for $pin<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $pin<T> {}

        impl<T> fmt::Debug for $pin<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($pin))
                    .field("storage", &self.storage)
                    .finish()
            }
        }
    };
}

typed_pin_impls!(DataPin);
typed_pin_impls!(DataSinkPin);

fn reset_texture(value: &mut dyn Any) {
    if let Some(slot) = value.downcast_mut::<Option<TransientTextureId>>() {
        *slot = None;
    }
}

fn reset_buffer(value: &mut dyn Any) {
    if let Some(slot) = value.downcast_mut::<Option<TransientBufferId>>() {
        *slot = None;
    }
}

fn reset_sink<T: 'static>(value: &mut dyn Any) {
    if let Some(items) = value.downcast_mut::<Vec<T>>() {
        items.clear();
    }
}

impl PinField for TexturePin {
    fn kind() -> PinKind {
        PinKind::Texture
    }

    fn create_storage() -> Box<dyn Any> {
        Box::new(None::<TransientTextureId>)
    }

    fn reset() -> Option<fn(&mut dyn Any)> {
        Some(reset_texture)
    }

    fn storage_key(&self) -> Option<StorageKey> {
        self.storage
    }

    fn bind(&mut self, key: StorageKey) {
        self.storage = Some(key);
    }
}

impl PinField for BufferPin {
    fn kind() -> PinKind {
        PinKind::Buffer
    }

    fn create_storage() -> Box<dyn Any> {
        Box::new(None::<TransientBufferId>)
    }

    fn reset() -> Option<fn(&mut dyn Any)> {
        Some(reset_buffer)
    }

    fn storage_key(&self) -> Option<StorageKey> {
        self.storage
    }

    fn bind(&mut self, key: StorageKey) {
        self.storage = Some(key);
    }
}

impl<T: Default + 'static> PinField for DataPin<T> {
    fn kind() -> PinKind {
        PinKind::Data(DataType::of::<T>())
    }

    fn create_storage() -> Box<dyn Any> {
        Box::new(T::default())
    }

    fn storage_key(&self) -> Option<StorageKey> {
        self.storage
    }

    fn bind(&mut self, key: StorageKey) {
        self.storage = Some(key);
    }
}

impl<T: 'static> PinField for DataSinkPin<T> {
    fn kind() -> PinKind {
        PinKind::Sink(DataType::of::<T>())
    }

    fn create_storage() -> Box<dyn Any> {
        Box::new(Vec::<T>::new())
    }

    fn reset() -> Option<fn(&mut dyn Any)> {
        Some(reset_sink::<T>)
    }

    fn storage_key(&self) -> Option<StorageKey> {
        self.storage
    }

    fn bind(&mut self, key: StorageKey) {
        self.storage = Some(key);
    }
}

type BindFn = Box<dyn Fn(&mut dyn Any, StorageKey) -> bool + Send + Sync>;

/// One declared pin of a node type.
pub struct PinDeclaration {
    name: String,
    kind: PinKind,
    required: bool,
    create_storage: fn() -> Box<dyn Any>,
    reset: Option<fn(&mut dyn Any)>,
    bind: BindFn,
}

impl PinDeclaration {
    /// Building fails with `MissingConnection` if the pin has no producer
    /// and is not a subgraph input.
    pub fn required(&mut self) -> &mut Self {
        self.required = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> PinKind {
        self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Point the pin field of `node` at `key`. Returns false if `node` is
    /// not of the declaring type.
    pub(crate) fn bind(&self, node: &mut dyn Any, key: StorageKey) -> bool {
        (self.bind)(node, key)
    }
}

impl fmt::Debug for PinDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinDeclaration")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .finish()
    }
}

/// Collects the pins of node type `N`.
///
/// ```ignore
/// fn declare_pins(pins: &mut PinDeclarations<Self>) {
///     pins.texture("color", |n| &mut n.color).required();
///     pins.data("exposure", |n| &mut n.exposure);
/// }
/// ```
pub struct PinDeclarations<N> {
    pins: Vec<PinDeclaration>,
    _marker: PhantomData<fn(&mut N)>,
}

impl<N: 'static> PinDeclarations<N> {
    pub(crate) fn new() -> Self {
        Self {
            pins: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_pins(self) -> Vec<PinDeclaration> {
        self.pins
    }

    pub fn texture(&mut self, name: &str, accessor: fn(&mut N) -> &mut TexturePin) -> &mut PinDeclaration {
        self.declare(name, accessor)
    }

    pub fn buffer(&mut self, name: &str, accessor: fn(&mut N) -> &mut BufferPin) -> &mut PinDeclaration {
        self.declare(name, accessor)
    }

    pub fn data<T: Default + 'static>(
        &mut self,
        name: &str,
        accessor: fn(&mut N) -> &mut DataPin<T>,
    ) -> &mut PinDeclaration {
        self.declare(name, accessor)
    }

    pub fn sink<T: 'static>(
        &mut self,
        name: &str,
        accessor: fn(&mut N) -> &mut DataSinkPin<T>,
    ) -> &mut PinDeclaration {
        self.declare(name, accessor)
    }

    fn declare<P: PinField>(&mut self, name: &str, accessor: fn(&mut N) -> &mut P) -> &mut PinDeclaration {
        debug_assert!(
            self.pins.iter().all(|p| p.name != name),
            "pin '{name}' declared twice on {}",
            std::any::type_name::<N>()
        );

        let bind: BindFn = Box::new(move |node: &mut dyn Any, key: StorageKey| {
            match node.downcast_mut::<N>() {
                Some(node) => {
                    accessor(node).bind(key);
                    true
                }
                None => false,
            }
        });

        self.pins.push(PinDeclaration {
            name: name.to_owned(),
            kind: P::kind(),
            required: false,
            create_storage: P::create_storage,
            reset: P::reset(),
            bind,
        });

        let last = self.pins.len() - 1;
        &mut self.pins[last]
    }
}
