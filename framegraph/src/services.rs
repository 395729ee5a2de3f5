//! Type-keyed services shared with nodes.
//!
//! Nodes never reach for globals. Anything they need beyond their pins (a
//! draw registry, a camera, frame timing) is inserted here by the owning
//! loop and read through [`BuildContext::service`] or
//! [`ExecuteContext::service`].
//!
//! [`BuildContext::service`]: crate::graph::BuildContext::service
//! [`ExecuteContext::service`]: crate::graph::ExecuteContext::service

use std::any::{Any, TypeId};
use std::collections::HashMap;

#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service, returning the previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: T) -> Option<T> {
        self.services
            .insert(TypeId::of::<T>(), Box::new(service))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.services.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.services.contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.services
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(ServiceRegistry: Send, Sync);
