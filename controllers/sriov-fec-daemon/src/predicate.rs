//! Watch event filters.
//!
//! The daemon only reacts to its own node's resource, and only when its spec
//! changed. Without the generation check every status write made by the
//! reconciler would come back as an update event and trigger another pass.

use kube::{Resource, ResourceExt};
use tracing::debug;

/// A change observed on the watch stream.
#[derive(Debug)]
pub enum ResourceEvent<'a, K> {
    Create(&'a K),
    Update { old: &'a K, new: &'a K },
    Delete(&'a K),
}

impl<'a, K: Resource> ResourceEvent<'a, K> {
    /// The object as it is now (or was, for deletes).
    pub fn object(&self) -> &'a K {
        match self {
            Self::Create(obj) | Self::Delete(obj) => *obj,
            Self::Update { new, .. } => *new,
        }
    }
}

/// Decides whether an event should trigger reconciliation.
pub trait EventPredicate<K> {
    fn create(&self, obj: &K) -> bool;
    fn update(&self, old: &K, new: &K) -> bool;
    fn delete(&self, obj: &K) -> bool;

    fn admits(&self, event: &ResourceEvent<'_, K>) -> bool {
        match event {
            ResourceEvent::Create(obj) => self.create(obj),
            ResourceEvent::Update { old, new } => self.update(old, new),
            ResourceEvent::Delete(obj) => self.delete(obj),
        }
    }
}

/// Admits events for the resource named after this node.
#[derive(Debug, Clone)]
pub struct NodeNamePredicate {
    node_name: String,
}

impl NodeNamePredicate {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    fn matches<K: Resource>(&self, obj: &K) -> bool {
        let name = obj.name_any();
        if name == self.node_name {
            true
        } else {
            debug!(name = %name, expected = %self.node_name, "resource intended for another node - ignoring");
            false
        }
    }
}

impl<K: Resource> EventPredicate<K> for NodeNamePredicate {
    fn create(&self, obj: &K) -> bool {
        self.matches(obj)
    }

    fn update(&self, _old: &K, new: &K) -> bool {
        self.matches(new)
    }

    fn delete(&self, obj: &K) -> bool {
        self.matches(obj)
    }
}

/// Admits updates only when `metadata.generation` changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationChangedPredicate;

impl<K: Resource> EventPredicate<K> for GenerationChangedPredicate {
    fn create(&self, _obj: &K) -> bool {
        true
    }

    fn update(&self, old: &K, new: &K) -> bool {
        old.meta().generation != new.meta().generation
    }

    fn delete(&self, _obj: &K) -> bool {
        true
    }
}

/// Logical AND of two predicates.
#[derive(Debug, Clone)]
pub struct And<A, B>(pub A, pub B);

impl<K, A: EventPredicate<K>, B: EventPredicate<K>> EventPredicate<K> for And<A, B> {
    fn create(&self, obj: &K) -> bool {
        self.0.create(obj) && self.1.create(obj)
    }

    fn update(&self, old: &K, new: &K) -> bool {
        self.0.update(old, new) && self.1.update(old, new)
    }

    fn delete(&self, obj: &K) -> bool {
        self.0.delete(obj) && self.1.delete(obj)
    }
}

/// The daemon's event filter.
pub type NodeEventFilter = And<NodeNamePredicate, GenerationChangedPredicate>;

pub fn node_event_filter(node_name: &str) -> NodeEventFilter {
    And(NodeNamePredicate::new(node_name), GenerationChangedPredicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::node_config;
    use crds::{Condition, ConditionStatus, ConfigurationReason, SriovFecNodeConfigStatus};

    #[test]
    fn test_other_nodes_are_ignored() {
        let filter = node_event_filter("worker-1");
        let other = node_config("worker-2", 1, vec![]);
        assert!(!filter.admits(&ResourceEvent::Create(&other)));
        assert!(!filter.admits(&ResourceEvent::Delete(&other)));

        let mine = node_config("worker-1", 1, vec![]);
        assert!(filter.admits(&ResourceEvent::Create(&mine)));
    }

    #[test]
    fn test_spec_edit_is_admitted() {
        let filter = node_event_filter("worker-1");
        let old = node_config("worker-1", 1, vec![]);
        let new = node_config("worker-1", 2, vec![]);
        assert!(filter.admits(&ResourceEvent::Update { old: &old, new: &new }));
    }

    #[test]
    fn test_status_only_updates_are_suppressed() {
        let filter = node_event_filter("worker-1");
        let original = node_config("worker-1", 3, vec![]);

        let mut first = original.clone();
        first.status = Some(SriovFecNodeConfigStatus {
            conditions: vec![Condition::configured(
                ConditionStatus::False,
                ConfigurationReason::InProgress,
                "Configuration started",
                3,
            )],
            ..Default::default()
        });
        let mut second = first.clone();
        second.status = Some(SriovFecNodeConfigStatus {
            conditions: vec![Condition::configured(
                ConditionStatus::True,
                ConfigurationReason::Succeeded,
                "Configured successfully",
                3,
            )],
            ..Default::default()
        });

        assert!(!filter.admits(&ResourceEvent::Update { old: &original, new: &first }));
        assert!(!filter.admits(&ResourceEvent::Update { old: &first, new: &second }));
    }

    #[test]
    fn test_name_check_uses_new_object_on_update() {
        let filter = node_event_filter("worker-1");
        let old = node_config("worker-2", 1, vec![]);
        let new = node_config("worker-1", 2, vec![]);
        assert!(filter.admits(&ResourceEvent::Update { old: &old, new: &new }));
        assert_eq!(ResourceEvent::Update { old: &old, new: &new }.object().name_any(), "worker-1");
    }
}
