//! Per-entity-type listener registry

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::ListenerConfig;

/// Process-unique identity of one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// A config as stored in the registry
#[derive(Debug)]
pub struct RegisteredListener {
    pub id: ListenerId,
    pub entity_type: String,
    pub config: ListenerConfig,
}

/// Entity type → listeners, in registration order.
///
/// Removal is by [`ListenerId`], so two structurally identical configs are
/// still independent registrations.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, Vec<Arc<RegisteredListener>>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        entity_type: impl Into<String>,
        config: ListenerConfig,
    ) -> Arc<RegisteredListener> {
        let entity_type = entity_type.into();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let listener = Arc::new(RegisteredListener {
            id,
            entity_type: entity_type.clone(),
            config,
        });

        self.listeners
            .entry(entity_type.clone())
            .or_default()
            .push(listener.clone());

        debug!(entity_type = %entity_type, listener_id = %id, "Listener registered");
        listener
    }

    /// Remove exactly the registration with `id`.
    pub fn remove(&self, entity_type: &str, id: ListenerId) -> Option<Arc<RegisteredListener>> {
        let mut removed = None;

        if let Some(mut entry) = self.listeners.get_mut(entity_type) {
            if let Some(pos) = entry.iter().position(|l| l.id == id) {
                removed = Some(entry.remove(pos));
            }
        }
        self.listeners.remove_if(entity_type, |_, list| list.is_empty());

        if removed.is_some() {
            debug!(entity_type = %entity_type, listener_id = %id, "Listener unregistered");
        }
        removed
    }

    /// Snapshot of the listeners for `entity_type`.
    pub fn listeners_for(&self, entity_type: &str) -> Vec<Arc<RegisteredListener>> {
        self.listeners
            .get(entity_type)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Total number of registrations.
    pub fn len(&self) -> usize {
        self.listeners.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> ListenerConfig {
        ListenerConfig::from_fn(|_| async { Ok(()) })
    }

    #[test]
    fn test_registration_order_is_kept() {
        let registry = ListenerRegistry::new();
        let a = registry.add("user", noop());
        let b = registry.add("user", noop());
        let c = registry.add("user", noop());

        let ids: Vec<_> = registry.listeners_for("user").iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![a.id, b.id, c.id]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_identical_configs_are_removed_independently() {
        let registry = ListenerRegistry::new();
        let config = noop();
        let first = registry.add("user", config.clone());
        let second = registry.add("user", config);

        let removed = registry.remove("user", second.id).unwrap();
        assert_eq!(removed.id, second.id);

        let remaining = registry.listeners_for("user");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, first.id);

        assert!(registry.remove("user", second.id).is_none());
    }

    #[test]
    fn test_empty_entity_is_dropped() {
        let registry = ListenerRegistry::new();
        let only = registry.add("order", noop());
        registry.add("user", noop());

        registry.remove("order", only.id);
        assert!(!registry.listeners.contains_key("order"));
        assert!(registry.listeners_for("order").is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_entity_lookup() {
        let registry = ListenerRegistry::new();
        assert!(registry.listeners_for("nothing").is_empty());
        assert!(registry.remove("nothing", ListenerId(42)).is_none());
        assert!(registry.is_empty());
    }
}
