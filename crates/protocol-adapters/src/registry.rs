use std::sync::Arc;

use dashmap::DashMap;
use pool_core::ProtocolAdapter;

/// Adapter lookup keyed by lowercase protocol id.
///
/// One instance is built per scheduler and shared through an `Arc`.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ProtocolAdapter>>,
    by_protocol: DashMap<String, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of adapters, later entries winning on conflicts.
    pub fn with_adapters(adapters: impl IntoIterator<Item = Arc<dyn ProtocolAdapter>>) -> Self {
        let registry = Self::new();
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    /// Register an adapter under every protocol id it declares.
    pub fn register(&self, adapter: Arc<dyn ProtocolAdapter>) {
        for protocol_id in &adapter.supports().protocol_ids {
            self.by_protocol
                .insert(protocol_id.to_lowercase(), Arc::clone(&adapter));
        }
        tracing::debug!(
            adapter = adapter.id(),
            protocols = ?adapter.supports().protocol_ids,
            "Registered protocol adapter"
        );
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Remove an adapter. Protocol ids since claimed by another adapter are left alone.
    pub fn unregister(&self, adapter_id: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        let (_, adapter) = self.adapters.remove(adapter_id)?;
        for protocol_id in &adapter.supports().protocol_ids {
            self.by_protocol
                .remove_if(&protocol_id.to_lowercase(), |_, current| current.id() == adapter_id);
        }
        Some(adapter)
    }

    /// Case-insensitive lookup by protocol id.
    pub fn resolve(&self, protocol_id: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        self.by_protocol
            .get(&protocol_id.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// All registered adapters ordered by id.
    pub fn list_all(&self) -> Vec<Arc<dyn ProtocolAdapter>> {
        let mut adapters: Vec<_> = self
            .adapters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        adapters.sort_by(|a, b| a.id().cmp(b.id()));
        adapters
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
