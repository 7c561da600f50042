use std::sync::Arc;

use crate::backend::{Backend, BackendConfig, BackendDescriptor, BackendId};
use crate::error::RegistryError;

/// Ordered set of backends keyed by id.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: impl IntoIterator<Item = BackendConfig>) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(Backend::new(config))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, backend: Backend) -> Result<Arc<Backend>, RegistryError> {
        if self.backends.iter().any(|existing| existing.id() == backend.id()) {
            return Err(RegistryError::DuplicateBackend(backend.id().to_string()));
        }
        let backend = Arc::new(backend);
        self.backends.push(Arc::clone(&backend));
        Ok(backend)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends
            .iter()
            .find(|backend| backend.id().as_str() == id)
            .cloned()
    }

    pub fn require(&self, id: &str) -> Result<Arc<Backend>, RegistryError> {
        self.get(id)
            .ok_or_else(|| RegistryError::UnknownBackend(id.to_string()))
    }

    pub fn ids(&self) -> Vec<BackendId> {
        self.backends.iter().map(|backend| backend.id().clone()).collect()
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(|backend| backend.describe()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
