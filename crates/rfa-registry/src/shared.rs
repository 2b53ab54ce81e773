use crate::Registry;
use std::sync::{Arc, PoisonError, RwLock};

/// Cloneable handle to a registry shared between callers.
///
/// Writers take the lock exclusively, so every mutation is applied whole.
/// A computation run inside [`SharedRegistry::read`] sees one snapshot.
#[derive(Clone, Debug, Default)]
pub struct SharedRegistry(Arc<RwLock<Registry>>);

impl SharedRegistry {
    pub fn new(registry: Registry) -> Self {
        Self(Arc::new(RwLock::new(registry)))
    }

    pub fn read<T>(&self, f: impl FnOnce(&Registry) -> T) -> T {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<T>(&self, f: impl FnOnce(&mut Registry) -> T) -> T {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Copy of the current state, e.g. to persist it.
    pub fn snapshot(&self) -> Registry {
        self.read(Registry::clone)
    }
}
